//! Worker pool.
//!
//! An [`EventConsumer`] owns one broker subscription and one handler and
//! processes messages strictly in delivery order. A [`ParallelConsumer`] runs
//! several of them over a shared sink and tears them all down when any one
//! fails or the process is signalled.

use crate::broker::{BrokerMessage, EventSource};
use crate::error::{ConsumerError, HandlerError};
use crate::storage::Storage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default bound on a single broker read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Handles one message end to end
#[async_trait]
pub trait ProcessHandler: Send {
    /// Decode, execute and store the scan carried by `message`
    async fn process(
        &mut self,
        message: &BrokerMessage,
        storage: &dyn Storage,
    ) -> Result<(), HandlerError>;
}

/// One subscription and its handler
pub struct EventConsumer {
    id: usize,
    source: Box<dyn EventSource>,
    handler: Box<dyn ProcessHandler>,
    read_timeout: Duration,
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("id", &self.id)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl EventConsumer {
    /// Consumer `id` reading from `source`
    #[must_use]
    pub fn new(
        id: usize,
        source: Box<dyn EventSource>,
        handler: Box<dyn ProcessHandler>,
    ) -> Self {
        Self {
            id,
            source,
            handler,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Bound each broker read
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Process messages until `token` is cancelled.
    ///
    /// Read timeouts and handler errors are absorbed; any other broker error
    /// ends the loop. A message being processed when cancellation arrives is
    /// finished first.
    pub async fn run(
        mut self,
        storage: &dyn Storage,
        token: CancellationToken,
    ) -> Result<(), ConsumerError> {
        debug!(consumer = self.id, "consumer started");
        loop {
            let message = tokio::select! {
                biased;
                () = token.cancelled() => break,
                read = self.source.read_message(self.read_timeout) => read,
            };
            let message = match message {
                Ok(message) => message,
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    error!(consumer = self.id, error = %e, "broker read failed");
                    return Err(e.into());
                }
            };
            if let Err(e) = self.handler.process(&message, storage).await {
                warn!(
                    consumer = self.id,
                    topic = %message.topic,
                    error = %e,
                    "failed to process message"
                );
            }
        }
        debug!(consumer = self.id, "consumer stopped");
        Ok(())
    }
}

/// Builds the subscription and handler of consumer `n`
pub type ConsumerFactory = Box<
    dyn Fn(usize) -> Result<(Box<dyn EventSource>, Box<dyn ProcessHandler>), ConsumerError>
        + Send
        + Sync,
>;

/// A pool of consumers sharing one sink
pub struct ParallelConsumer {
    factory: ConsumerFactory,
    concurrency: usize,
    read_timeout: Duration,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for ParallelConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelConsumer")
            .field("concurrency", &self.concurrency)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl ParallelConsumer {
    /// Pool of `concurrency` consumers built by `factory`
    #[must_use]
    pub fn new(factory: ConsumerFactory, concurrency: usize, storage: Arc<dyn Storage>) -> Self {
        Self {
            factory,
            concurrency: concurrency.max(1),
            read_timeout: DEFAULT_READ_TIMEOUT,
            storage,
        }
    }

    /// Bound each broker read
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Run until `token` is cancelled, a consumer fails, or the process is
    /// signalled. Returns after every consumer has drained.
    pub async fn run(self, token: CancellationToken) -> Result<(), ConsumerError> {
        self.storage.open().await?;

        let mut consumers = Vec::with_capacity(self.concurrency);
        for n in 0..self.concurrency {
            match (self.factory)(n) {
                Ok((source, handler)) => consumers.push(
                    EventConsumer::new(n, source, handler).with_read_timeout(self.read_timeout),
                ),
                Err(e) => {
                    self.storage.close().await?;
                    return Err(e);
                }
            }
        }

        let signal = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = shutdown_signal() => {
                        info!("shutdown signal received");
                        token.cancel();
                    }
                    () = token.cancelled() => {}
                }
            })
        };

        info!(consumers = consumers.len(), "starting consumer pool");
        let mut tasks = JoinSet::new();
        for consumer in consumers {
            let storage = self.storage.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let result = consumer.run(storage.as_ref(), token.clone()).await;
                if result.is_err() {
                    token.cancel();
                }
                result
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| ConsumerError::Task(e.to_string())).and_then(|r| r);
            if let Err(e) = result {
                token.cancel();
                first_error.get_or_insert(e);
            }
        }

        token.cancel();
        signal.abort();
        self.storage.close().await?;
        info!("consumer pool drained");
        first_error.map_or(Ok(()), Err)
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
