//! Scan pipeline for the encrypted-DNS survey.
//!
//! Targets enter through an ingester, travel through the broker as JSON
//! envelopes, and are executed by worker pools that publish follow-up scans
//! and persist every finished envelope:
//!
//! - [`producer`]: one-shot file and watched-directory ingesters feeding a
//!   rate-limited [`Publisher`]
//! - [`broker`]: the [`EventProducer`]/[`EventSource`] seam, with an
//!   in-memory broker and, behind the `kafka` feature, Kafka
//! - [`consumer`]: [`ParallelConsumer`] worker pools with signal-driven
//!   shutdown
//! - [`handler`]: per-type execution, follow-up scheduling and certificate
//!   escalation
//! - [`cache`]: per-run deduplication of follow-ups
//! - [`storage`]: JSON-lines files, memory, and MongoDB behind `mongo`
//!
//! # Example
//!
//! ```rust,ignore
//! use doe_scan::{HandlerContext, MemoryBroker, ScanHandler};
//! use doe_probe::{ProbeConfig, Probes};
//! use std::sync::Arc;
//!
//! let broker = MemoryBroker::new();
//! let context = HandlerContext::new(Arc::new(broker.clone()), Probes::network(&ProbeConfig::default()));
//! let handler = ScanHandler::new(Arc::new(context));
//! ```

pub mod blocklist;
pub mod broker;
pub mod cache;
pub mod consumer;
mod error;
pub mod handler;
pub mod producer;
pub mod storage;

pub use blocklist::Blocklist;
pub use broker::{BrokerMessage, EventProducer, EventSource, MemoryBroker, MemorySource};
pub use cache::ScanRunCache;
pub use consumer::{
    shutdown_signal, ConsumerFactory, EventConsumer, ParallelConsumer, ProcessHandler,
};
pub use error::{BrokerError, ConsumerError, HandlerError, ProducerError, StorageError};
pub use handler::{HandlerContext, ScanHandler};
pub use producer::{
    factory_for, FactorySettings, FileProducer, IpVersion, Publisher, ScanFactory, TargetLine,
    WatchDirectoryProducer,
};
pub use storage::{FileStorage, MemoryStorage, Storage};
