//! DDR: discover designated resolvers and schedule encrypted probes of them.

use super::{HandlerContext, Scheduled};
use doe_core::svcb::has_critical;
use doe_core::types::dns::build_query;
use doe_core::types::{certificate, doh, doq, dot};
use doe_core::{
    parse_svcb, svcb_answers, CertificateQuery, CertificateScan, CoreError, DdrResult, DdrScan,
    DohQuery, DohScan, DoqQuery, DoqScan, DotQuery, DotScan, Endpoint, ErrorCause, HttpVersion,
    PtrQuery, PtrScan, Scan, ScanError, ScanMetadata, SvcbRecord,
};
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use std::net::IpAddr;
use tracing::debug;

/// Port PTR lookups are sent to
const RESOLVER_PORT: u16 = 53;

impl HandlerContext {
    pub(super) async fn handle_ddr(&self, scan: &mut DdrScan) {
        let host_ip = scan.query.dns.host.parse::<IpAddr>().ok();

        match self.probes.dns.run(&scan.query.dns).await {
            Ok(response) => {
                let mut records = Vec::new();
                for svcb in svcb_answers(&response.message) {
                    let (record, errors) = parse_svcb(svcb, &scan.meta.scan_id);
                    let usable = !has_critical(&errors);
                    for error in errors {
                        scan.meta.add_error(error);
                    }
                    if usable {
                        records.push(record);
                    }
                }
                debug!(
                    scan_id = %scan.meta.scan_id,
                    host = %scan.query.dns.host,
                    records = records.len(),
                    "designated resolvers discovered"
                );

                if scan.query.schedule_doe_scans {
                    for record in &records {
                        self.schedule_doe_scans(&mut scan.meta, host_ip, record).await;
                    }
                }
                scan.result = Some(DdrResult {
                    response,
                    svcb: records,
                });
            }
            Err(e) => {
                scan.meta.add_error(e);
            }
        }

        if let Some(addr) = host_ip {
            scan.ptr_scheduled = self.schedule_ptr(&mut scan.meta, addr).await;
        }
    }

    async fn schedule_doe_scans(
        &self,
        meta: &mut ScanMetadata,
        host_ip: Option<IpAddr>,
        record: &SvcbRecord,
    ) {
        match self.doe_scans(meta, host_ip, record) {
            Ok(scans) => {
                for child in scans {
                    self.schedule(meta, child).await;
                }
            }
            Err(e) => {
                meta.add_error(ScanError::scan(ErrorCause::Pack, false, e));
            }
        }
    }

    /// DoH, DoT, DoQ and certificate scans for one designated resolver
    fn doe_scans(
        &self,
        meta: &ScanMetadata,
        host_ip: Option<IpAddr>,
        record: &SvcbRecord,
    ) -> Result<Vec<Scan>, CoreError> {
        let message = build_query(&self.doe_query_name, RecordType::A, false)?;
        let ip = host_ip.or_else(|| hinted_address(record));
        let endpoint = |default_port: u16| {
            let endpoint = Endpoint::new(record.target.clone(), record.port.unwrap_or(default_port));
            match ip {
                Some(ip) => endpoint.with_ip(ip),
                None => endpoint,
            }
        };

        let mut scans = Vec::new();
        for version in record.alpn.iter().filter_map(|id| HttpVersion::from_alpn(id)) {
            let template = record
                .dohpath
                .clone()
                .unwrap_or_else(|| doh::DEFAULT_URI_TEMPLATE.to_string());
            let query = DohQuery::new(endpoint(doh::DEFAULT_PORT), message.clone())
                .with_uri_template(template)
                .with_http_version(version);
            scans.push(DohScan::new(meta.child(), query).into());
        }
        if record.supports("dot") {
            let query = DotQuery::new(endpoint(dot::DEFAULT_PORT), message.clone());
            scans.push(DotScan::new(meta.child(), query).into());
        }
        if record.supports("doq") {
            let query = DoqQuery::new(endpoint(doq::DEFAULT_PORT), with_zero_id(&message));
            scans.push(DoqScan::new(meta.child(), query).into());
        }

        let http = record
            .alpn
            .iter()
            .any(|id| HttpVersion::from_alpn(id).is_some());
        let port = if http {
            certificate::DEFAULT_PORT
        } else {
            dot::DEFAULT_PORT
        };
        let query = CertificateQuery::new(endpoint(port), record.alpn.clone());
        scans.push(CertificateScan::new(meta.child(), query).into());
        Ok(scans)
    }

    /// Returns true if a PTR scan for `addr` is published or already
    /// scheduled in this run
    async fn schedule_ptr(&self, meta: &mut ScanMetadata, addr: IpAddr) -> bool {
        let query = match PtrQuery::new(addr, self.default_resolver.as_str(), RESOLVER_PORT) {
            Ok(query) => query,
            Err(e) => {
                meta.add_error(ScanError::scan(ErrorCause::Pack, false, e));
                return false;
            }
        };
        let child = PtrScan::new(meta.child(), query).into();
        self.schedule(meta, child).await != Scheduled::Failed
    }
}

/// First address hint of a record
fn hinted_address(record: &SvcbRecord) -> Option<IpAddr> {
    record
        .ipv4hint
        .first()
        .copied()
        .map(IpAddr::V4)
        .or_else(|| record.ipv6hint.first().copied().map(IpAddr::V6))
}

/// DoQ sends messages with ID zero
fn with_zero_id(message: &Message) -> Message {
    let mut message = message.clone();
    message.set_id(0);
    message
}

#[cfg(test)]
mod tests {
    use super::super::testing::{dns_probe, dns_response, failing_probes, fixture_with, published};
    use super::super::ScanHandler;
    use super::*;
    use crate::broker::{BrokerMessage, EventProducer};
    use crate::consumer::ProcessHandler;
    use crate::storage::MemoryStorage;
    use doe_core::testing::{svcb_rdata, ResponseBuilder, SvcParam};
    use doe_core::types::ddr::DDR_NAME;
    use doe_core::{DdrQuery, Scan, ScanType};
    use doe_probe::Probes;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn google_svcb() -> ResponseBuilder {
        ResponseBuilder::new(DDR_NAME, RecordType::SVCB).answer(
            DDR_NAME,
            300,
            svcb_rdata(
                1,
                "dns.google.",
                &[
                    SvcParam::alpn(&["dot", "h2", "h3"]),
                    SvcParam::port(443),
                    SvcParam::ipv4hint(&[Ipv4Addr::new(8, 8, 8, 8)]),
                    SvcParam::dohpath("/dns-query{?dns}"),
                ],
            ),
        )
    }

    fn probes_answering(builder: ResponseBuilder) -> Probes {
        let message = builder.build();
        let (dns, _) = dns_probe(move |_| Ok(dns_response(message.clone())));
        Probes {
            dns,
            ..failing_probes()
        }
    }

    fn ddr_scan(host: &str) -> Scan {
        DdrScan::new(
            ScanMetadata::new_root("run-1", "vp1"),
            DdrQuery::new(host, 53).unwrap(),
        )
        .into()
    }

    async fn process(handler: &mut ScanHandler, scan: &Scan, storage: &MemoryStorage) {
        let message = BrokerMessage {
            topic: scan.topic(),
            key: scan.identifier(),
            payload: scan.marshal().unwrap(),
        };
        handler.process(&message, storage).await.unwrap();
    }

    #[tokio::test]
    async fn test_ddr_happy_path() {
        let fixture = fixture_with(probes_answering(google_svcb()));
        let mut handler = ScanHandler::new(fixture.context.clone());
        let scan = ddr_scan("8.8.8.8");
        process(&mut handler, &scan, &fixture.storage).await;

        let dot = published(&fixture.broker, "dot-scan-vp1");
        assert_eq!(dot.len(), 1);
        let endpoint = dot[0].endpoint().unwrap();
        assert_eq!(endpoint.host, "dns.google.");
        assert_eq!(endpoint.port, 443);
        assert_eq!(endpoint.ip, Some("8.8.8.8".parse().unwrap()));

        let doh = published(&fixture.broker, "doh-scan-vp1");
        let mut versions: Vec<HttpVersion> = doh
            .iter()
            .map(|s| match s {
                Scan::Doh(d) => {
                    assert_eq!(d.query.uri_template, "/dns-query{?dns}");
                    d.query.http_version
                }
                other => panic!("unexpected {:?}", other.scan_type()),
            })
            .collect();
        versions.sort_by_key(ToString::to_string);
        assert_eq!(versions, vec![HttpVersion::H2, HttpVersion::H3]);

        assert!(published(&fixture.broker, "doq-scan-vp1").is_empty());
        assert_eq!(published(&fixture.broker, "certificate-scan-vp1").len(), 1);

        let ptr = published(&fixture.broker, "ptr-scan-vp1");
        assert_eq!(ptr.len(), 1);
        let Scan::Ptr(ptr) = &ptr[0] else {
            panic!("expected a PTR scan");
        };
        assert_eq!(
            ptr.query.dns.question_name().as_deref(),
            Some("8.8.8.8.in-addr.arpa.")
        );
        assert_eq!(ptr.query.dns.host, "8.8.8.8");

        let stored = fixture.storage.get(scan.scan_id()).unwrap();
        assert!(stored.meta().errors.is_empty());
        let Scan::Ddr(stored) = stored else {
            panic!("expected a DDR scan");
        };
        assert!(stored.ptr_scheduled);
        let result = stored.result.unwrap();
        assert_eq!(result.svcb.len(), 1);
        assert_eq!(result.svcb[0].dohpath.as_deref(), Some("/dns-query{?dns}"));

        for child in doh.iter().chain(&dot) {
            assert_eq!(child.meta().parent_scan_id.as_deref(), Some(scan.scan_id()));
            assert_eq!(child.meta().root_scan_id, scan.meta().root_scan_id);
            assert_eq!(child.meta().run_id, "run-1");
        }
    }

    #[tokio::test]
    async fn test_ddr_without_svcb() {
        let empty = ResponseBuilder::new(DDR_NAME, RecordType::SVCB);
        let fixture = fixture_with(probes_answering(empty));
        let mut handler = ScanHandler::new(fixture.context.clone());

        let by_ip = ddr_scan("192.0.2.53");
        process(&mut handler, &by_ip, &fixture.storage).await;
        let by_name = ddr_scan("resolver.example.");
        process(&mut handler, &by_name, &fixture.storage).await;

        assert_eq!(fixture.broker.topics(), vec!["ptr-scan-vp1".to_string()]);
        assert_eq!(published(&fixture.broker, "ptr-scan-vp1").len(), 1);

        let Scan::Ddr(ip_scan) = fixture.storage.get(by_ip.scan_id()).unwrap() else {
            panic!("expected a DDR scan");
        };
        assert!(ip_scan.meta.errors.is_empty());
        assert!(ip_scan.ptr_scheduled);
        let Scan::Ddr(name_scan) = fixture.storage.get(by_name.scan_id()).unwrap() else {
            panic!("expected a DDR scan");
        };
        assert!(!name_scan.ptr_scheduled);
        assert!(name_scan.meta.errors.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_follow_ups_skipped_within_run() {
        let fixture = fixture_with(probes_answering(google_svcb()));
        let mut handler = ScanHandler::new(fixture.context.clone());
        process(&mut handler, &ddr_scan("8.8.8.8"), &fixture.storage).await;
        process(&mut handler, &ddr_scan("8.8.8.8"), &fixture.storage).await;

        assert_eq!(published(&fixture.broker, "dot-scan-vp1").len(), 1);
        assert_eq!(published(&fixture.broker, "ptr-scan-vp1").len(), 1);
        assert_eq!(fixture.storage.len(), 2);
    }

    #[tokio::test]
    async fn test_critical_svcb_record_not_scheduled() {
        let builder = ResponseBuilder::new(DDR_NAME, RecordType::SVCB).answer(
            DDR_NAME,
            300,
            svcb_rdata(1, "dns.example.", &[SvcParam::port(853)]),
        );
        let fixture = fixture_with(probes_answering(builder));
        let mut handler = ScanHandler::new(fixture.context.clone());
        let scan = ddr_scan("resolver.example.");
        process(&mut handler, &scan, &fixture.storage).await;

        assert!(fixture.broker.topics().is_empty());
        let stored = fixture.storage.get(scan.scan_id()).unwrap();
        assert!(stored.meta().has_critical_error());
    }

    #[tokio::test]
    async fn test_publish_failure_recorded_on_parent() {
        let fixture = fixture_with(probes_answering(google_svcb()));
        fixture.broker.close();
        let mut handler = ScanHandler::new(fixture.context.clone()).for_type(ScanType::Ddr);
        let scan = ddr_scan("8.8.8.8");
        process(&mut handler, &scan, &fixture.storage).await;

        let Scan::Ddr(stored) = fixture.storage.get(scan.scan_id()).unwrap() else {
            panic!("expected a DDR scan");
        };
        assert!(!stored.ptr_scheduled);
        assert!(!stored.meta.errors.is_empty());
        assert!(stored
            .meta
            .errors
            .iter()
            .all(|e| e.cause == ErrorCause::Producer && !e.critical));
        assert!(fixture.broker.produce("t", "k", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_hostname_uses_address_hint() {
        let fixture = fixture_with(probes_answering(google_svcb()));
        let context = Arc::clone(&fixture.context);
        let meta = ScanMetadata::new_root("run-1", "vp1");
        let record = SvcbRecord {
            target: "dns.google.".into(),
            alpn: vec!["doq".into()],
            ipv4hint: vec![Ipv4Addr::new(8, 8, 4, 4)],
            ..SvcbRecord::default()
        };
        let scans = context.doe_scans(&meta, None, &record).unwrap();
        assert_eq!(scans.len(), 2);
        let Scan::Doq(doq) = &scans[0] else {
            panic!("expected a DoQ scan");
        };
        assert_eq!(doq.query.endpoint.ip, Some("8.8.4.4".parse().unwrap()));
        assert_eq!(doq.query.endpoint.port, 853);
        assert_eq!(doq.query.message.id(), 0);
        let Scan::Certificate(cert) = &scans[1] else {
            panic!("expected a certificate scan");
        };
        assert_eq!(cert.query.endpoint.port, 853);
        assert_eq!(cert.query.alpn, vec!["doq"]);
    }
}
