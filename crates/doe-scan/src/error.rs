//! Error types for the scan pipeline.

use doe_core::CoreError;
use thiserror::Error;

/// Errors from a message broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// No message arrived within the read timeout. Consumers ignore it.
    #[error("broker read timed out")]
    Timeout,

    /// Publishing a message failed.
    #[error("produce to {topic} failed: {message}")]
    Produce { topic: String, message: String },

    /// Reading from the broker failed.
    #[error("consume failed: {0}")]
    Consume(String),

    /// Client configuration or connection failed.
    #[error("broker client error: {0}")]
    Client(String),

    /// The broker has been shut down.
    #[error("broker closed")]
    Closed,
}

impl BrokerError {
    /// Returns true for the benign read timeout.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Errors from a result sink.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The sink was used before `open` or after `close`.
    #[error("storage is not open")]
    NotOpen,

    /// Writing to the sink failed.
    #[error("storage write failed: {0}")]
    Write(String),

    /// Connecting to the sink failed.
    #[error("storage connection failed: {0}")]
    Connection(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors a process handler surfaces to its consumer loop.
///
/// Probe failures are not handler errors; they are recorded in the stored
/// envelope.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The message was not a valid scan envelope; nothing was stored.
    #[error("malformed envelope: {0}")]
    Decode(#[from] CoreError),

    /// The envelope could not be stored.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The message belongs to another scan type.
    #[error("handler for {expected} received a {received} scan")]
    WrongType { expected: String, received: String },
}

/// Errors that end a consumer loop.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Fatal broker failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The shared sink could not be opened or closed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Building a consumer failed.
    #[error("consumer setup failed: {0}")]
    Setup(String),

    /// A consumer task panicked or was aborted.
    #[error("consumer task failed: {0}")]
    Task(String),
}

/// Errors from the ingesters.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// Publishing failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Encoding a scan failed.
    #[error(transparent)]
    Encode(#[from] CoreError),

    /// Watching the directory failed.
    #[error("watch error: {0}")]
    Watch(String),

    /// Messages were still queued after the final flush.
    #[error("{remaining} messages not delivered after flush")]
    Undelivered { remaining: usize },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<notify::Error> for ProducerError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}
