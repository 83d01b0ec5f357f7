//! Core types for the encrypted-DNS survey.
//!
//! This crate provides the data model shared by the probe engines and the
//! scan pipeline:
//!
//! - **Envelopes**: [`Scan`], a tagged sum with one variant per scan type,
//!   carrying lineage, timestamps, accumulated errors, query and result
//! - **Errors**: the [`ScanError`] taxonomy stored with every envelope, and
//!   [`CoreError`] for encoding failures
//! - **SVCB**: decoding of service binding records into [`SvcbRecord`]
//!
//! # Example
//!
//! ```rust,ignore
//! use doe_core::{DdrQuery, DdrScan, Scan, ScanMetadata};
//!
//! let meta = ScanMetadata::new_root("run-1", "eu1");
//! let scan: Scan = DdrScan::new(meta, DdrQuery::new("8.8.8.8", 53)?).into();
//! assert_eq!(scan.topic(), "ddr-scan-eu1");
//! ```

mod error;
pub mod svcb;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod wire;

pub use error::{CoreError, ErrorCause, ErrorKind, Result, ScanError};
pub use svcb::{parse_svcb, svcb_answers, SvcbRecord};
pub use types::*;
