//! Scripted probes for handler tests.

use super::HandlerContext;
use crate::broker::MemoryBroker;
use crate::storage::MemoryStorage;
use async_trait::async_trait;
use doe_core::{DnsQuery, DnsResponse, ErrorCause, Scan, ScanError, TransportProtocol};
use doe_probe::{DynProbe, Probe, Probes};
use hickory_proto::op::Message;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Respond<Q, O> = Box<dyn Fn(&Q) -> Result<O, ScanError> + Send + Sync>;

/// Answers every query through a closure and records it
pub struct FakeProbe<Q, O> {
    respond: Respond<Q, O>,
    calls: Mutex<Vec<Q>>,
}

impl<Q, O> FakeProbe<Q, O> {
    pub fn new(respond: impl Fn(&Q) -> Result<O, ScanError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// A probe that is never expected to run
    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(ScanError::query(ErrorCause::Other, "probe not scripted")))
    }
}

impl<Q: Clone, O> FakeProbe<Q, O> {
    pub fn calls(&self) -> Vec<Q> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl<Q, O> Probe<Q> for FakeProbe<Q, O>
where
    Q: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    type Output = O;

    async fn run(&self, query: &Q) -> Result<O, ScanError> {
        self.calls.lock().push(query.clone());
        (self.respond)(query)
    }
}

fn failing<Q, O>() -> DynProbe<Q, O>
where
    Q: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    FakeProbe::<Q, O>::failing()
}

/// Probes that fail unless replaced
pub fn failing_probes() -> Probes {
    Probes {
        dns: failing(),
        ptr: failing(),
        resinfo: failing(),
        dot: failing(),
        doh: failing(),
        doq: failing(),
        certificate: failing(),
        ssh: failing(),
    }
}

/// A classical DNS response as the engine would return it
pub fn dns_response(message: Message) -> DnsResponse {
    DnsResponse {
        message,
        rtt: Duration::from_millis(4),
        protocol: TransportProtocol::Udp,
        udp_attempts: 1,
        tcp_attempts: 0,
    }
}

/// A DNS probe answering from `respond`
pub fn dns_probe(
    respond: impl Fn(&DnsQuery) -> Result<DnsResponse, ScanError> + Send + Sync + 'static,
) -> (DynProbe<DnsQuery, DnsResponse>, Arc<FakeProbe<DnsQuery, DnsResponse>>) {
    let fake = FakeProbe::new(respond);
    let probe: DynProbe<DnsQuery, DnsResponse> = fake.clone();
    (probe, fake)
}

pub struct Fixture {
    pub context: Arc<HandlerContext>,
    pub broker: MemoryBroker,
    pub storage: Arc<MemoryStorage>,
}

pub fn fixture() -> Fixture {
    fixture_with(failing_probes())
}

pub fn fixture_with(probes: Probes) -> Fixture {
    let broker = MemoryBroker::new();
    let context = HandlerContext::new(Arc::new(broker.clone()), probes);
    Fixture {
        context: Arc::new(context),
        broker,
        storage: Arc::new(MemoryStorage::new()),
    }
}

/// Decoded envelopes waiting on `topic`
pub fn published(broker: &MemoryBroker, topic: &str) -> Vec<Scan> {
    broker
        .pending(topic)
        .iter()
        .map(|m| Scan::unmarshal(&m.payload).unwrap())
        .collect()
}
