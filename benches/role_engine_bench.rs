use criterion::{criterion_group, criterion_main, Criterion};
use hap_graphlet::flow::{well_known_protocol, FlowRecord, FlowType};
use hap_graphlet::loader::FlowList;
use hap_graphlet::{role, IpAddr, Prefs};
use std::hint::black_box;

/// One local host talking to many distinct servers (client-role-heavy) plus
/// a handful of inbound flows to a fixed local port (server-role-heavy).
fn sample_flows() -> Vec<FlowRecord> {
    let local = IpAddr::from_ipv4_octets([10, 0, 0, 1]);
    let mut flows = Vec::new();
    for i in 0..2000u32 {
        flows.push(FlowRecord::new(
            local,
            20000 + (i % 1000) as u16,
            IpAddr::from_ipv4_octets([93, 184, (i / 256) as u8, (i % 256) as u8]),
            443,
            well_known_protocol::TCP,
            FlowType::new(FlowType::BIFLOW),
            1_700_000_000_000 + i as u64,
            500,
            2048,
            4,
        ));
    }
    for i in 0..500u32 {
        flows.push(FlowRecord::new(
            local,
            80,
            IpAddr::from_ipv4_octets([203, 0, (i / 256) as u8, (i % 256) as u8]),
            30000 + (i % 1000) as u16,
            well_known_protocol::TCP,
            FlowType::new(FlowType::BIFLOW),
            1_700_000_000_000 + i as u64,
            500,
            2048,
            4,
        ));
    }
    flows
}

fn criterion_benchmark(c: &mut Criterion) {
    let flows = sample_flows();
    let list = FlowList::load(flows);
    let prefs = Prefs::default();
    let local = IpAddr::from_ipv4_octets([10, 0, 0, 1]);

    c.bench_function("infer_roles 2.5k flows, one host", |b| {
        b.iter(|| {
            let view = list.active_view(black_box(&local));
            let (roles, _, _, _) = role::infer_roles(view, list.flows(), &prefs);
            black_box(roles.len());
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
