//! Provides a means to read, parse and hold configuration options for scans.
use crate::error::ScanError;
use crate::port_strategy::PortRange;
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of probes allowed in flight per pool.
pub const DEFAULT_BATCH_SIZE: u16 = 100;

/// What the run should do.
///   - Sweep pings every host of the selected /24 subnets.
///   - Tcp enumerates open TCP ports (with banners) on one host.
///   - Udp enumerates UDP ports that answer a probe datagram on one host.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Sweep,
    Tcp,
    Udp,
}

/// Represents the strategy in which the port scanning will run.
///   - Serial will run from start to end, for example 1 to 1_000.
///   - Random will randomize the order in which ports will be scanned.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "netscanner",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Local network discovery and TCP/UDP service enumeration.
/// WARNING Only scan networks and hosts you are allowed to probe.
pub struct Opts {
    /// Sweep the local subnets, or scan the TCP/UDP ports of a single host.
    #[arg(short, long, value_enum, ignore_case = true, default_value = "sweep")]
    pub mode: Mode,

    /// A comma-delimited list of subnets to sweep, e.g. 192.168.1.0/24,10.0.0.0/24.
    /// Local subnets are detected when none are given.
    #[arg(short, long, value_delimiter = ',')]
    pub subnets: Vec<String>,

    /// Host to port scan in tcp or udp mode.
    #[arg(long)]
    pub host: Option<String>,

    /// Port range to scan, e.g. 1-1000.
    #[arg(short, long, default_value = "1-1024")]
    pub range: PortRange,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only output the results, one per line.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Print the results as JSON.
    #[arg(long)]
    pub json: bool,

    /// Also write the results as JSON to this file, e.g. results.json.
    #[arg(short, long, value_parser)]
    pub output: Option<PathBuf>,

    /// A comma-delimited list or file of DNS resolvers used for reverse lookups.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Maximum number of probes in flight at once, per subnet or port range.
    /// Depends on the open file limit of your OS.
    #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u16,

    /// The timeout in milliseconds for an echo probe or a connection attempt.
    #[arg(short, long, default_value = "1000")]
    pub timeout: u32,

    /// The timeout in milliseconds for reading a TCP banner.
    #[arg(long, default_value = "2000")]
    pub banner_timeout: u32,

    /// How long in milliseconds to wait for a UDP reply.
    #[arg(long, default_value = "2000")]
    pub udp_wait: u32,

    /// The number of tries before a port is assumed to be closed.
    /// If set to 0, netscanner will correct it to 1.
    #[arg(long, default_value = "1")]
    pub tries: u8,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// The order of scanning to be performed. The "serial" option will
    /// scan ports in ascending order while the "random" option will scan
    /// ports randomly.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            mode,
            subnets,
            range,
            greppable,
            accessible,
            json,
            batch_size,
            timeout,
            banner_timeout,
            udp_wait,
            tries,
            scan_order
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(host, resolver, ulimit, output);
    }

    /// Concurrency ceiling for each probing pool, never below one.
    pub fn concurrency(&self) -> usize {
        usize::from(self.batch_size.max(1))
    }

    /// Deadline for a single echo probe or connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout))
    }

    /// Deadline for the banner connection and read.
    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.banner_timeout))
    }

    /// How long a UDP probe waits for a reply.
    pub fn udp_wait(&self) -> Duration {
        Duration::from_millis(u64::from(self.udp_wait))
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            mode: Mode::Sweep,
            subnets: vec![],
            host: None,
            range: PortRange::default(),
            no_config: true,
            config_path: None,
            greppable: true,
            accessible: false,
            json: false,
            output: None,
            resolver: None,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: 1_000,
            banner_timeout: 2_000,
            udp_wait: 2_000,
            tries: 1,
            ulimit: None,
            scan_order: ScanOrder::Serial,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    mode: Option<Mode>,
    subnets: Option<Vec<String>>,
    host: Option<String>,
    range: Option<PortRange>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    json: Option<bool>,
    output: Option<PathBuf>,
    resolver: Option<String>,
    batch_size: Option<u16>,
    timeout: Option<u32>,
    banner_timeout: Option<u32>,
    udp_wait: Option<u32>,
    tries: Option<u8>,
    ulimit: Option<u64>,
    scan_order: Option<ScanOrder>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing or unreadable file yields an empty config.
    ///
    /// # Format
    ///
    /// mode = "tcp"
    /// host = "192.168.1.10"
    /// range = [1, 1024]
    /// batch_size = 100
    /// scan_order = "Serial"
    /// subnets = ["192.168.1.0/24"]
    /// output = "results.json"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self, ScanError> {
        let Some(config_path) = custom_config_path.or_else(default_config_path) else {
            return Ok(Self::default());
        };

        let content = if config_path.exists() {
            fs::read_to_string(config_path).unwrap_or_default()
        } else {
            String::new()
        };

        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self, ScanError> {
        Ok(toml::from_str(content)?)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".netscanner.toml");
    Some(config_path)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use parameterized::parameterized;

    use super::{Config, Mode, Opts, ScanOrder};
    use crate::port_strategy::PortRange;
    use std::path::PathBuf;

    impl Config {
        fn sample() -> Self {
            Self {
                mode: Some(Mode::Tcp),
                subnets: Some(vec!["10.0.0.0/24".to_owned()]),
                host: Some("127.0.0.1".to_owned()),
                range: Some(PortRange::new(20, 25).unwrap()),
                greppable: Some(false),
                accessible: Some(true),
                json: None,
                output: Some(PathBuf::from("results.json")),
                resolver: Some("1.1.1.1".to_owned()),
                batch_size: Some(50),
                timeout: Some(500),
                banner_timeout: None,
                udp_wait: None,
                tries: Some(2),
                ulimit: Some(4_096),
                scan_order: Some(ScanOrder::Random),
            }
        }
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[parameterized(input = {
        vec!["netscanner"],
        vec!["netscanner", "--mode", "tcp", "--host", "127.0.0.1", "-r", "79-81"],
        vec!["netscanner", "-m", "UDP", "--host", "10.0.0.1", "--range", "52-54"],
    }, mode = {
        Mode::Sweep,
        Mode::Tcp,
        Mode::Udp,
    })]
    fn parse_mode(input: Vec<&str>, mode: Mode) {
        let opts = Opts::parse_from(input);
        assert_eq!(opts.mode, mode);
    }

    #[test]
    fn parse_subnet_list() {
        let opts = Opts::parse_from(["netscanner", "-s", "192.168.1.0/24,10.0.0.0/24"]);
        assert_eq!(opts.subnets, vec!["192.168.1.0/24", "10.0.0.0/24"]);
        assert_eq!(opts.batch_size, 100);
        assert_eq!(opts.range, PortRange::new(1, 1024).unwrap());
    }

    #[test]
    fn parse_output_path() {
        let opts = Opts::parse_from(["netscanner", "--json", "-o", "scan.json"]);
        assert!(opts.json);
        assert_eq!(opts.output, Some(PathBuf::from("scan.json")));

        let opts = Opts::parse_from(["netscanner"]);
        assert_eq!(opts.output, None);
    }

    #[test]
    fn reversed_range_is_rejected_by_cli() {
        let result = Opts::try_parse_from(["netscanner", "-m", "tcp", "-r", "100-50"]);
        assert!(result.is_err());
    }

    #[test]
    fn opts_no_merge_when_config_is_ignored() {
        let mut opts = Opts::default();
        let config = Config::sample();
        opts.merge(&config);

        assert_eq!(opts.mode, Mode::Sweep);
        assert!(opts.subnets.is_empty());
        assert_eq!(opts.host, None);
        assert_eq!(opts.batch_size, 100);
        assert_eq!(opts.scan_order, ScanOrder::Serial);
    }

    #[test]
    fn opts_merge_required_arguments() {
        let mut opts = Opts::default();
        let config = Config::sample();
        opts.merge_required(&config);

        assert_eq!(opts.mode, Mode::Tcp);
        assert_eq!(opts.subnets, config.subnets.unwrap());
        assert_eq!(opts.range, config.range.unwrap());
        assert_eq!(opts.batch_size, 50);
        assert_eq!(opts.timeout, 500);
        assert_eq!(opts.banner_timeout, 2_000);
        assert_eq!(opts.tries, 2);
        assert!(opts.accessible);
        assert!(!opts.greppable);
        assert_eq!(opts.scan_order, ScanOrder::Random);
    }

    #[test]
    fn opts_merge_optional_arguments() {
        let mut opts = Opts::default();
        let config = Config::sample();
        opts.merge_optional(&config);

        assert_eq!(opts.host, config.host);
        assert_eq!(opts.resolver, config.resolver);
        assert_eq!(opts.ulimit, config.ulimit);
        assert_eq!(opts.output, config.output);
    }

    #[test]
    fn config_parses_toml() {
        let config = Config::parse(
            r#"
            mode = "udp"
            host = "10.0.0.1"
            range = [52, 54]
            batch_size = 10
            scan_order = "Random"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, Some(Mode::Udp));
        assert_eq!(config.range, Some(PortRange::new(52, 54).unwrap()));
        assert_eq!(config.batch_size, Some(10));
        assert_eq!(config.scan_order, Some(ScanOrder::Random));
    }

    #[test]
    fn config_rejects_reversed_range() {
        assert!(Config::parse("range = [100, 50]").is_err());
    }

    #[test]
    fn empty_config_is_valid() {
        let config = Config::parse("").unwrap();
        assert!(config.mode.is_none());
        assert!(config.range.is_none());
    }

    #[test]
    fn zero_batch_size_still_allows_one_probe() {
        let opts = Opts {
            batch_size: 0,
            ..Opts::default()
        };
        assert_eq!(opts.concurrency(), 1);
    }
}
