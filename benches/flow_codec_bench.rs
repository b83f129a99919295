use criterion::{criterion_group, criterion_main, Criterion};
use hap_graphlet::codec;
use hap_graphlet::flow::{well_known_protocol, FlowRecord, FlowType};
use hap_graphlet::IpAddr;
use std::hint::black_box;

fn sample_flows(n: usize) -> Vec<FlowRecord> {
    (0..n)
        .map(|i| {
            FlowRecord::new(
                IpAddr::from_ipv4_octets([10, 0, (i / 256) as u8, (i % 256) as u8]),
                1024 + (i % 4096) as u16,
                IpAddr::from_ipv4_octets([93, 184, 216, 34]),
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
    let flows = sample_flows(10_000);
    let path = std::env::temp_dir().join("hap_graphlet_bench_flows.hpf.gz");
    codec::write_flows(&path, &flows).unwrap();

    c.bench_function("read_flows 10k records", |b| {
        b.iter(|| {
            let read_back = codec::read_flows(black_box(&path)).unwrap();
            black_box(read_back.len());
        })
    });

    c.bench_function("write_flows 10k records", |b| {
        b.iter(|| {
            codec::write_flows(black_box(&path), black_box(&flows)).unwrap();
        })
    });

    std::fs::remove_file(&path).ok();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
