use criterion::{black_box, criterion_group, criterion_main, Criterion};
use np_ws::frame::{apply_mask, build_frame, parse_frame, Opcode};

fn bench_build_masked_4kb(c: &mut Criterion) {
    let payload = vec![0xABu8; 4096];

    c.bench_function("frame_build_masked_4kb", |b| {
        b.iter(|| black_box(build_frame(&payload, Opcode::Binary, true)));
    });
}

fn bench_parse_masked_4kb(c: &mut Criterion) {
    let bytes = build_frame(&vec![0xABu8; 4096], Opcode::Binary, true);

    c.bench_function("frame_parse_masked_4kb", |b| {
        b.iter(|| black_box(parse_frame(&bytes).unwrap()));
    });
}

fn bench_parse_unmasked_1mb(c: &mut Criterion) {
    let bytes = build_frame(&vec![0u8; 1 << 20], Opcode::Binary, false);

    c.bench_function("frame_parse_unmasked_1mb", |b| {
        b.iter(|| black_box(parse_frame(&bytes).unwrap()));
    });
}

fn bench_apply_mask_64kb(c: &mut Criterion) {
    let mut data = vec![0x5Au8; 65_536];

    c.bench_function("apply_mask_64kb", |b| {
        b.iter(|| apply_mask(black_box(&mut data), [1, 2, 3, 4]));
    });
}

criterion_group!(
    benches,
    bench_build_masked_4kb,
    bench_parse_masked_4kb,
    bench_parse_unmasked_1mb,
    bench_apply_mask_64kb,
);
criterion_main!(benches);
