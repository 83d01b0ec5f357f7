//! Single-exchange lookups against a resolver: PTR, RESINFO, canaries,
//! software fingerprints and signed DDR answers.

use super::HandlerContext;
use doe_core::types::dns::{build_query, build_query_in_class};
use doe_core::types::fingerprint::VERSION_NAMES;
use doe_core::wire::CLASS_CH;
use doe_core::{
    CanaryDomainResult, CanaryResult, CanaryScan, DdrDnssecResult, DdrDnssecScan, DnsQuery,
    FingerprintResult, FingerprintScan, PtrScan, ResinfoScan, ScanError, VersionAnswer,
};
use futures_util::future::join_all;
use hickory_proto::rr::RecordType;

impl HandlerContext {
    pub(super) async fn handle_ptr(&self, scan: &mut PtrScan) {
        match self.probes.ptr.run(&scan.query).await {
            Ok(result) => scan.result = Some(result),
            Err(e) => {
                scan.meta.add_error(e);
            }
        }
    }

    pub(super) async fn handle_resinfo(&self, scan: &mut ResinfoScan) {
        match self.probes.resinfo.run(&scan.query).await {
            Ok(result) => scan.result = Some(result),
            Err(e) => {
                scan.meta.add_error(e);
            }
        }
    }

    pub(super) async fn handle_ddr_dnssec(&self, scan: &mut DdrDnssecScan) {
        match self.probes.dns.run(&scan.query.dns).await {
            Ok(response) => scan.result = Some(DdrDnssecResult::from_response(response)),
            Err(e) => {
                scan.meta.add_error(e);
            }
        }
    }

    /// Query every canary domain; a domain without a response is recorded
    /// as such next to the error explaining it
    pub(super) async fn handle_canary(&self, scan: &mut CanaryScan) {
        let mut queries = Vec::with_capacity(scan.query.domains.len());
        for domain in &scan.query.domains {
            match build_query(domain, RecordType::A, false) {
                Ok(message) => queries.push((
                    domain.clone(),
                    DnsQuery::new(scan.query.host.clone(), scan.query.port, message),
                )),
                Err(e) => {
                    scan.meta.add_error(ScanError::query_config(e).add_info(domain));
                }
            }
        }

        let responses = join_all(queries.iter().map(|(_, q)| self.probes.dns.run(q))).await;
        let mut result = CanaryResult::default();
        for ((domain, _), response) in queries.into_iter().zip(responses) {
            let outcome = match response {
                Ok(response) => CanaryDomainResult::from_response(domain, response),
                Err(e) => {
                    scan.meta.add_error(e.add_info(&domain));
                    CanaryDomainResult::no_response(domain)
                }
            };
            result.domains.push(outcome);
        }
        scan.result = Some(result);
    }

    /// CHAOS version queries and an SSH handshake, run concurrently
    pub(super) async fn handle_fingerprint(&self, scan: &mut FingerprintScan) {
        let mut queries = Vec::with_capacity(VERSION_NAMES.len());
        for name in VERSION_NAMES {
            match build_query_in_class(name, u16::from(RecordType::TXT), CLASS_CH, false) {
                Ok(message) => queries.push((
                    name,
                    DnsQuery::new(scan.query.host.clone(), scan.query.port, message),
                )),
                Err(e) => {
                    scan.meta.add_error(ScanError::query_config(e).add_info(name));
                }
            }
        }

        let versions = join_all(queries.iter().map(|(_, q)| self.probes.dns.run(q)));
        let (versions, ssh) = tokio::join!(versions, self.probes.ssh.run(&scan.query.ssh));

        let mut result = FingerprintResult::default();
        for ((name, _), response) in queries.into_iter().zip(versions) {
            match response {
                Ok(response) => result.versions.push(VersionAnswer::from_response(name, response)),
                Err(e) => {
                    scan.meta.add_error(e.add_info(name));
                }
            }
        }
        match ssh {
            Ok(response) => result.ssh = Some(response),
            Err(e) => {
                scan.meta.add_error(e.add_info("ssh"));
            }
        }
        scan.result = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{dns_probe, dns_response, failing_probes, fixture_with, FakeProbe};
    use super::super::ScanHandler;
    use super::*;
    use doe_core::testing::{a_rdata, ptr_rdata, txt_rdata, ResponseBuilder};
    use doe_core::{
        CanaryQuery, ErrorCause, FingerprintQuery, PtrQuery, PtrResult, Scan, ScanMetadata,
        SshQuery, SshResponse,
    };
    use doe_probe::{DynProbe, Probes};
    use std::net::Ipv4Addr;

    fn meta() -> ScanMetadata {
        ScanMetadata::new_root("run-1", "vp1")
    }

    async fn handle(probes: Probes, scan: impl Into<Scan>) -> Scan {
        let fixture = fixture_with(probes);
        let mut scan = scan.into();
        ScanHandler::new(fixture.context).handle(&mut scan).await;
        scan
    }

    #[tokio::test]
    async fn test_canary_partial_failure() {
        let (dns, fake) = dns_probe(|q| {
            let name = q.question_name().unwrap_or_default();
            match name.as_str() {
                "use-application-dns.net." => Ok(dns_response(
                    ResponseBuilder::new(&name, RecordType::A).rcode(3).build(),
                )),
                "mask.icloud.com." => Ok(dns_response(
                    ResponseBuilder::new(&name, RecordType::A)
                        .answer(&name, 60, a_rdata(Ipv4Addr::new(17, 248, 1, 1)))
                        .build(),
                )),
                _ => Err(ScanError::no_response("no response after 3 attempts")),
            }
        });
        let scan = CanaryScan::new(meta(), CanaryQuery::new("192.0.2.53", 53));
        let Scan::Canary(done) = handle(Probes { dns, ..failing_probes() }, scan).await else {
            panic!("expected a canary scan");
        };

        assert_eq!(fake.calls().len(), 3);
        assert!(fake.calls().iter().all(|q| q.host == "192.0.2.53"));
        let domains = done.result.unwrap().domains;
        assert_eq!(domains.len(), 3);
        assert!(domains[0].blocked);
        assert!(domains[0].response_code.is_some());
        assert!(!domains[1].blocked);
        assert_eq!(domains[1].answer_count, 1);
        assert!(domains[2].response.is_none());

        assert_eq!(done.meta.errors.len(), 1);
        assert!(done.meta.errors[0].is_no_response());
        assert!(done.meta.errors[0].additional_info.contains("mask-h2.icloud.com."));
    }

    #[tokio::test]
    async fn test_fingerprint_chaos_and_ssh() {
        let (dns, fake) = dns_probe(|q| {
            let name = q.question_name().unwrap_or_default();
            if name == "version.bind." {
                Ok(dns_response(
                    ResponseBuilder::with_type(&name, u16::from(RecordType::TXT))
                        .class(CLASS_CH)
                        .answer(&name, 0, txt_rdata(&["unbound 1.19.0"]))
                        .build(),
                ))
            } else {
                Err(ScanError::query(ErrorCause::Timeout, "timed out"))
            }
        });
        let ssh: DynProbe<SshQuery, SshResponse> =
            FakeProbe::<SshQuery, SshResponse>::new(|q| {
                assert_eq!(q.port, 22);
                Err(ScanError::query(ErrorCause::Dial, "connection refused").non_critical())
            });
        let scan = FingerprintScan::new(meta(), FingerprintQuery::new("192.0.2.53", 53));
        let Scan::Fingerprint(done) =
            handle(Probes { dns, ssh, ..failing_probes() }, scan).await
        else {
            panic!("expected a fingerprint scan");
        };

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        let question = &calls[0].message.queries()[0];
        assert_eq!(u16::from(question.query_class()), CLASS_CH);
        assert_eq!(question.query_type(), RecordType::TXT);

        let result = done.result.unwrap();
        assert_eq!(result.versions.len(), 1);
        assert_eq!(result.versions[0].txt, vec!["unbound 1.19.0"]);
        assert!(result.ssh.is_none());
        assert_eq!(done.meta.errors.len(), 2);
        let ssh_error = done.meta.errors.iter().find(|e| e.cause == ErrorCause::Dial).unwrap();
        assert!(!ssh_error.critical);
    }

    #[tokio::test]
    async fn test_ptr_uses_lookup_engine() {
        let ptr: DynProbe<PtrQuery, PtrResult> = FakeProbe::<PtrQuery, PtrResult>::new(|q| {
            let response = dns_response(
                ResponseBuilder::new("8.8.8.8.in-addr.arpa.", RecordType::PTR)
                    .answer("8.8.8.8.in-addr.arpa.", 300, ptr_rdata("dns.google."))
                    .build(),
            );
            assert_eq!(q.dns.host, "9.9.9.9");
            Ok(PtrResult::from_response(response))
        });
        let query = PtrQuery::new("8.8.8.8".parse().unwrap(), "9.9.9.9", 53).unwrap();
        let probes = Probes {
            ptr,
            ..failing_probes()
        };
        let Scan::Ptr(done) = handle(probes, PtrScan::new(meta(), query)).await else {
            panic!("expected a PTR scan");
        };
        assert_eq!(done.result.unwrap().hostnames, vec!["dns.google."]);
        assert!(done.meta.errors.is_empty());
    }

    #[tokio::test]
    async fn test_ddr_dnssec_failure_recorded() {
        let query = doe_core::DdrDnssecQuery::new("192.0.2.53", 53).unwrap();
        let scan = DdrDnssecScan::new(meta(), query);
        let Scan::DdrDnssec(done) = handle(failing_probes(), scan).await else {
            panic!("expected a DDR-DNSSEC scan");
        };
        assert!(done.result.is_none());
        assert!(done.meta.has_critical_error());
    }
}
