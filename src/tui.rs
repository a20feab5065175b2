//! Terminal messages for the binary.
//!
//! Every macro takes the message plus the `greppable` and `accessible`
//! flags. Greppable output only carries results, so nothing but [`output!`]
//! prints in that mode. Accessible mode drops the colored prefixes.

/// A problem the user should know about, printed with a red `[!]`.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        // if not greppable then print, otherwise no else statement so do not print.
        if !$greppable {
            if $accessible {
                // Don't print the ascii art
                println!("{}", $name);
            } else {
                println!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
            }
        }
    };
}

/// Progress information, printed with a blue `[~]`.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
            }
        }
    };
}

/// A result line, printed with a green `[>]`. Greppable mode prints the bare
/// line.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::green("[>]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if $greppable || $accessible {
            println!("{}", $name);
        } else {
            println!("{} {}", colored::Colorize::bold(colored::Colorize::green("[>]")), $name);
        }
    };
}
