// ABOUTME: Benchmarks for blob parsing, rule resolution and rendering
// ABOUTME: Runs over a synthesized board with a configurable number of devices using Criterion

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hwgen::dtb::builder::DtbBuilder;
use hwgen::pipeline::{self, Inputs};
use hwgen::{Backend, DeviceTreeParser};

const RULES: &str = r#"
rules:
  - name: gic
    match: { compatible: ['arm,gic-400'] }
    action: kernel
  - name: uarts
    match: { compatible-prefix: 'vendor,uart' }
    action: kernel
  - name: rest
    match: any
    action: ignore
"#;

/// A GIC plus `devices` UARTs behind a remapped bus
fn board(devices: u32) -> Vec<u8> {
    let mut b = DtbBuilder::new();
    b.begin_node("")
        .prop_u32("#address-cells", 2)
        .prop_u32("#size-cells", 2)
        .prop_u32("interrupt-parent", 1)
        .begin_node("memory@40000000")
        .prop_str("device_type", "memory")
        .prop_cells("reg", &[0, 0x4000_0000, 0, 0x4000_0000])
        .end_node()
        .begin_node("interrupt-controller@8000000")
        .prop_strs("compatible", &["arm,gic-400"])
        .prop_cells("reg", &[0, 0x0800_0000, 0, 0x1_0000])
        .prop_u32("#interrupt-cells", 3)
        .prop_u32("phandle", 1)
        .end_node()
        .begin_node("soc")
        .prop_u32("#address-cells", 1)
        .prop_u32("#size-cells", 1)
        .prop_cells("ranges", &[0, 0, 0x1000_0000, 0x1000_0000]);
    for i in 0..devices {
        let offset = i * 0x1000;
        b.begin_node(&format!("uart@{offset:x}"))
            .prop_strs("compatible", &["vendor,uart-v2", "vendor,uart"])
            .prop_cells("reg", &[offset, 0x1000])
            .prop_cells("interrupts", &[0, i, 4])
            .end_node();
    }
    b.end_node().end_node();
    b.finish()
}

fn inputs(devices: u32) -> Inputs {
    Inputs {
        dtb: board(devices),
        rules: RULES.to_owned(),
        arch: "aarch64".to_owned(),
        ..Inputs::default()
    }
}

fn bench_parse_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_tree");
    for devices in [16, 256] {
        let blob = board(devices);
        group.bench_with_input(BenchmarkId::from_parameter(devices), &blob, |b, blob| {
            b.iter(|| DeviceTreeParser::new(blob).parse_tree().unwrap())
        });
    }
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for devices in [16, 256] {
        let inputs = inputs(devices);
        group.bench_with_input(BenchmarkId::from_parameter(devices), &inputs, |b, inputs| {
            b.iter(|| pipeline::resolve(inputs).unwrap())
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let model = pipeline::resolve(&inputs(256)).unwrap();
    let mut group = c.benchmark_group("render");
    for backend in Backend::ALL {
        group.bench_function(backend.name(), |b| b.iter(|| backend.render(&model).unwrap()));
    }
    group.finish();
}

criterion_group!(benches, bench_parse_tree, bench_resolve, bench_render);
criterion_main!(benches);
