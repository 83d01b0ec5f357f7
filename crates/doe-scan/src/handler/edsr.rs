//! EDSR: follow designated-resolver redirections hop by hop.
//!
//! Every address known for the target receives an SVCB query for the
//! target's own name. A hop that advertises the protocol and carries glue
//! for the target name yields new addresses to visit; glue pointing at an
//! address already considered marks a loop and is not followed again.

use super::HandlerContext;
use doe_core::svcb::has_critical;
use doe_core::types::dns::{build_query, names_equal, record_addresses};
use doe_core::{
    parse_svcb, svcb_answers, DnsQuery, EdsrHop, EdsrResult, EdsrScan, ErrorCause, ScanError,
};
use hickory_proto::rr::{Record, RecordType};
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use tracing::debug;

/// Port hops are queried on
const HOP_PORT: u16 = 53;

impl HandlerContext {
    pub(super) async fn handle_edsr(&self, scan: &mut EdsrScan) {
        let seeds = self.edsr_seeds(scan).await;
        if seeds.is_empty() {
            scan.meta.add_error(ScanError::scan(
                ErrorCause::Other,
                true,
                format!("no addresses for {}", scan.query.target_name),
            ));
            return;
        }

        let message = match build_query(&scan.query.target_name, RecordType::SVCB, false) {
            Ok(message) => message,
            Err(e) => {
                scan.meta
                    .add_error(ScanError::query_config(e).add_info("edsr hop query"));
                return;
            }
        };
        let hop_query = |ip: IpAddr| {
            DnsQuery::new(ip.to_string(), HOP_PORT, message.clone()).with_timeout(scan.query.timeout)
        };

        let mut considered: HashSet<IpAddr> = seeds.iter().copied().collect();
        let mut queue: VecDeque<EdsrHop> = seeds
            .iter()
            .map(|ip| EdsrHop::new(None, 0, hop_query(*ip)))
            .collect();
        let mut result = EdsrResult::default();

        while let Some(mut hop) = queue.pop_front() {
            let glue = self.run_hop(&mut hop, &scan.query.target_name, &scan.query.protocol).await;
            result.edsr_detected |= hop.protocol_advertised;

            for ip in glue {
                if considered.insert(ip) {
                    queue.push_back(EdsrHop::new(Some(hop.id.clone()), hop.hop + 1, hop_query(ip)));
                } else {
                    hop.intersecting.push(ip);
                    result.loop_detected = true;
                }
            }
            debug!(
                scan_id = %scan.meta.scan_id,
                hop = hop.hop,
                resolver = %hop.query.host,
                advertised = hop.protocol_advertised,
                glue = hop.glue.len(),
                "edsr hop"
            );
            result.hops.push(hop);
        }
        scan.result = Some(result);
    }

    /// Initial addresses of the target: the target itself if it is an
    /// address, else its A and AAAA records from the recursive resolver
    async fn edsr_seeds(&self, scan: &mut EdsrScan) -> Vec<IpAddr> {
        if let Ok(ip) = scan.query.target_name.parse::<IpAddr>() {
            return vec![ip];
        }
        let mut seeds = Vec::new();
        for rtype in [RecordType::A, RecordType::AAAA] {
            let message = match build_query(&scan.query.target_name, rtype, false) {
                Ok(message) => message,
                Err(e) => {
                    scan.meta.add_error(ScanError::query_config(e));
                    return Vec::new();
                }
            };
            let query = DnsQuery::new(scan.query.resolver.clone(), HOP_PORT, message)
                .with_timeout(scan.query.timeout);
            match self.probes.dns.run(&query).await {
                Ok(response) => {
                    for ip in response.answer_addresses() {
                        if !seeds.contains(&ip) {
                            seeds.push(ip);
                        }
                    }
                }
                Err(e) => {
                    scan.meta.add_error(e.non_critical().add_info(format!("{rtype} seed lookup")));
                }
            }
        }
        seeds
    }

    /// Execute one hop and return the glue addresses it points to
    async fn run_hop(&self, hop: &mut EdsrHop, target: &str, protocol: &str) -> Vec<IpAddr> {
        let response = match self.probes.dns.run(&hop.query).await {
            Ok(response) => response,
            Err(e) => {
                hop.errors.push(e);
                return Vec::new();
            }
        };

        let additionals = response.message.additionals();
        if additionals.is_empty() {
            hop.errors.push(ScanError::scan(
                ErrorCause::NoGlueRecords,
                false,
                format!("{} returned no glue records", hop.query.host),
            ));
            hop.response = Some(response);
            return Vec::new();
        }

        for svcb in svcb_answers(&response.message) {
            if !names_equal(&svcb.target_name().to_string(), target) {
                continue;
            }
            let (record, errors) = parse_svcb(svcb, &hop.id);
            let usable = !has_critical(&errors);
            hop.errors.extend(errors);
            if usable {
                hop.protocol_advertised |= record.supports(protocol);
                hop.svcb.push(record);
            }
        }
        if !hop.protocol_advertised {
            hop.errors.push(ScanError::scan(
                ErrorCause::ResolverDoesNotAdvertiseProtocol,
                true,
                format!("{} does not advertise {protocol} for {target}", hop.query.host),
            ));
            hop.response = Some(response);
            return Vec::new();
        }

        let glue: Vec<Record> = additionals
            .iter()
            .filter(|r| names_equal(&r.name().to_string(), target))
            .cloned()
            .collect();
        hop.glue = record_addresses(&glue);
        hop.response = Some(response);
        hop.glue.clone()
    }
}
