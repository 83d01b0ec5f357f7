//! Single-purpose lookups carried by the classical DNS engine.

use crate::dns::{DnsProbe, DnsTransport};
use crate::probe::Probe;
use async_trait::async_trait;
use doe_core::{ErrorCause, PtrQuery, PtrResult, ResinfoQuery, ResinfoResult, ScanError};

#[async_trait]
impl<T: DnsTransport> Probe<ResinfoQuery> for DnsProbe<T> {
    type Output = ResinfoResult;

    async fn run(&self, query: &ResinfoQuery) -> Result<ResinfoResult, ScanError> {
        let response = self.exchange(&query.dns).await?;
        ResinfoResult::from_response(response).map_err(|e| {
            ScanError::query(ErrorCause::Unpack, e).add_info(format!("target={}", query.target_name))
        })
    }
}

#[async_trait]
impl<T: DnsTransport> Probe<PtrQuery> for DnsProbe<T> {
    type Output = PtrResult;

    async fn run(&self, query: &PtrQuery) -> Result<PtrResult, ScanError> {
        let response = self.exchange(&query.dns).await?;
        Ok(PtrResult::from_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::dns::tests::ScriptedTransport;
    use doe_core::testing::{ptr_rdata, resinfo_rdata, ResponseBuilder};
    use doe_core::types::resinfo::TYPE_RESINFO;
    use hickory_proto::rr::RecordType;
    use std::time::Duration;

    fn probe(answer: Vec<u8>) -> DnsProbe<ScriptedTransport> {
        DnsProbe::with_transport(ScriptedTransport::default().udp(Ok(answer)), &ProbeConfig::new())
    }

    #[tokio::test]
    async fn test_resinfo_lookup() {
        let answer = ResponseBuilder::with_type("dns.example.", TYPE_RESINFO)
            .answer("dns.example.", 300, resinfo_rdata(&["qnamemin", "exterr=15-17"]))
            .answer("dns.example.", 300, resinfo_rdata(&["infourl=https://x/"]))
            .to_wire();
        let mut query = ResinfoQuery::new("192.0.2.53", 53, "dns.example.").unwrap();
        query.dns.max_backoff_time = Duration::ZERO;

        let result: ResinfoResult = probe(answer).run(&query).await.unwrap();
        assert!(result.rfc9606_support);
        assert!(result.multiple_records);
        assert_eq!(result.keys, vec!["qnamemin", "exterr=15-17", "infourl=https://x/"]);
    }

    #[tokio::test]
    async fn test_ptr_lookup() {
        let answer = ResponseBuilder::new("8.8.8.8.in-addr.arpa.", RecordType::PTR)
            .answer("8.8.8.8.in-addr.arpa.", 300, ptr_rdata("dns.google."))
            .to_wire();
        let query = PtrQuery::new("8.8.8.8".parse().unwrap(), "192.0.2.53", 53).unwrap();

        let result: Result<PtrResult, ScanError> = probe(answer).run(&query).await;
        assert_eq!(result.unwrap().hostnames, vec!["dns.google."]);
    }
}
