use criterion::{criterion_group, criterion_main, Criterion};
use hap_graphlet::flow::{well_known_protocol, FlowRecord, FlowType};
use hap_graphlet::loader::FlowList;
use hap_graphlet::{role, GraphletAssembler, IpAddr, Prefs};
use std::hint::black_box;

fn sample_flows() -> Vec<FlowRecord> {
    let local = IpAddr::from_ipv4_octets([10, 0, 0, 1]);
    (0..2000u32)
        .map(|i| {
            FlowRecord::new(
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
            )
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let flows = sample_flows();
    let list = FlowList::load(flows);
    let prefs = Prefs::default();
    let local = IpAddr::from_ipv4_octets([10, 0, 0, 1]);
    let view = list.active_view(&local);
    let (roles, flow_role, _, _) = role::infer_roles(view, list.flows(), &prefs);

    c.bench_function("assemble graphlet, 2k flows", |b| {
        b.iter(|| {
            let mut assembler = GraphletAssembler::new();
            let records = assembler.assemble(black_box(view.flows()), black_box(&roles), black_box(&flow_role), 1);
            black_box(records.len());
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
