//! # doe-cli
//!
//! The `doe-scanner` binary of the encrypted-DNS survey.
//!
//! ## Roles
//!
//! - **consumer**: worker pools executing scans read from Kafka, publishing
//!   follow-ups and storing results
//! - **producer**: file or watched-directory ingestion of targets into root
//!   scans
//! - **standalone**: both in one process over an in-memory broker
//!
//! Configuration comes from flags or the environment; see [`config::Config`].

pub mod cli;
pub mod config;

pub use cli::run;
