//! This crate exposes the engine behind the `netscanner` binary: local host
//! discovery over /24 subnets and TCP/UDP service enumeration of one host.
//!
//! Every probe is its own tokio task. A pool hands out a limited number of
//! tickets, a ticket is taken before a probe is spawned and given back when
//! it finishes, so no run ever has more probes in flight than its ceiling.
//! Results are fanned in through a channel owned by the call that started
//! the run.
//!
//! ## Architecture Overview
//!
//! 1. [`address`] finds the local subnets (or parses the ones given) and
//!    does reverse DNS.
//! 2. [`sweep::Sweeper`] runs a [`probe::EchoProbe`] against all 254 hosts
//!    of each subnet on a [`pool::TaskPool`].
//! 3. [`aggregate::discover`] reads the ARP cache through [`mac`] and merges
//!    MAC addresses into the discovered [`model::Device`]s.
//! 4. [`scanner::Scanner`] independently enumerates TCP ports (with banner
//!    based service identification) or UDP ports of a single host.
//!
//! Probe failures never surface as errors. A host that did not answer, a
//! closed port and a port whose probe failed all look the same: they are
//! absent from the result.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use netscanner::input::ScanOrder;
//! use netscanner::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scanner = Scanner::new(
//!         100,                        // Probes in flight
//!         Duration::from_millis(1000), // Connect timeout
//!         Duration::from_millis(2000), // Banner timeout
//!         Duration::from_millis(2000), // UDP reply wait
//!         1,                          // Tries per port
//!         ScanOrder::Serial,
//!     );
//!
//!     let open = scanner.scan_tcp("127.0.0.1", 1, 1024).await?;
//!     for (port, info) in &open {
//!         println!("{port} {} {}", info.service, info.version);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Sweeping a subnet
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use netscanner::address::{DnsReverseLookup, Subnet};
//! use netscanner::aggregate::discover;
//! use netscanner::probe::SystemPing;
//! use netscanner::sweep::Sweeper;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let timeout = Duration::from_secs(1);
//! let resolver = DnsReverseLookup::new(&None, timeout).await;
//! let sweeper = Sweeper::new(Arc::new(SystemPing), Arc::new(resolver), 100, timeout);
//!
//! let devices = discover(&sweeper, &[Subnet::new(192, 168, 1)]).await;
//! println!("{} devices found", devices.len());
//! # }
//! ```
#![allow(clippy::needless_doctest_main)]
#![warn(missing_docs)]

pub mod tui;

pub mod input;

pub mod error;

pub mod model;

pub mod address;

pub mod probe;

pub mod pool;

pub mod sweep;

pub mod port_strategy;

pub mod scanner;

pub mod mac;

pub mod aggregate;
