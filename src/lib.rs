//! fleetscan - EC2 fleet inventory, AMI aging and patch status scanner.
//!
//! The library exposes the scanning pipeline ([`fleet::FleetManager`]) and
//! the capability traits it runs over, so the CLI and the tests share one
//! implementation.

pub mod aws;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod fleet;
pub mod instance;
pub mod logging;
pub mod output;
pub mod release;
pub mod scan;
pub mod session;
pub mod ssh;
