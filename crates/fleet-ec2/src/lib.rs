//! fleet-ec2 — `CloudProvider` backed by the `aws ec2` command-line client.
//!
//! Every call shells out with `--output json` and parses the response
//! with serde. Parsing and argument construction are plain functions so
//! they can be tested without the client installed.

pub mod cli;
pub mod parse;

pub use cli::AwsCli;
pub use parse::{parse_describe_instances, parse_run_instances};
