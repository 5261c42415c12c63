//! Codec and memory manager benchmarks.
//!
//! Covers the hot paths of a poll cycle:
//! - Frame checksums and multi-frame splicing
//! - Value encode/decode for scalars, text and arrays
//! - Register placement into merged areas

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mewtocol::frame::{bcc, build_frame, crc16, splice_frames, ChecksumKind};
use mewtocol::{
    decode, encode, ChangeNotifier, MemoryClass, MemoryConfig, MemoryManager, PlcArray, PlcType,
    PlcValue, RegisterDescriptor,
};
use std::hint::black_box as bb;

fn bench_checksums(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    let payload = format!("%01$RD{}", "3412".repeat(100));

    group.bench_function("bcc", |b| b.iter(|| bcc(bb(&payload))));
    group.bench_function("crc16", |b| b.iter(|| crc16(bb(&payload))));
    group.bench_function("build_frame", |b| {
        b.iter(|| build_frame(bb(&payload), ChecksumKind::Bcc))
    });

    let first = format!("%01$RD{}", "3412".repeat(50));
    let second = format!("%01{}", "CDAB".repeat(50));
    let parts = [
        format!("{first}{:02X}&\r", bcc(&first)),
        build_frame(&second, ChecksumKind::Bcc),
    ];
    group.bench_function("splice_two_frames", |b| {
        b.iter(|| splice_frames(bb(&parts), ChecksumKind::Bcc))
    });

    group.finish();
}

fn bench_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_codec");

    let real = PlcValue::Real(23.5);
    let real_bytes = encode(&PlcType::Real, &real).unwrap();
    group.bench_function("encode_real", |b| b.iter(|| encode(&PlcType::Real, bb(&real))));
    group.bench_function("decode_real", |b| {
        b.iter(|| decode(&PlcType::Real, bb(&real_bytes)))
    });

    let text_ty = PlcType::Text { capacity: 32 };
    let text = PlcValue::Text("BATCH-0042".to_string());
    let text_bytes = encode(&text_ty, &text).unwrap();
    group.bench_function("decode_text", |b| b.iter(|| decode(&text_ty, bb(&text_bytes))));

    for len in [10usize, 100] {
        let ty = PlcType::array(PlcType::Int, len);
        let value = PlcValue::Array(PlcArray::from_vec(
            (0..len).map(|i| PlcValue::Int(i as i16)).collect(),
        ));
        let bytes = encode(&ty, &value).unwrap();
        group.bench_with_input(BenchmarkId::new("decode_int_array", len), &bytes, |b, bytes| {
            b.iter(|| decode(&ty, bb(bytes)))
        });
    }

    group.finish();
}

fn bench_placement(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_manager");

    for count in [50u32, 500] {
        group.bench_with_input(BenchmarkId::new("register_scattered", count), &count, |b, &count| {
            b.iter(|| {
                let mut manager = MemoryManager::new(MemoryConfig::default(), ChangeNotifier::new());
                for i in 0..count {
                    // every third register leaves a gap too wide to merge
                    let address = i * 4 + (i / 3) * 20;
                    let descriptor = RegisterDescriptor::new(MemoryClass::DT, address, PlcType::DInt)
                        .with_poll_level(1 + i % 3);
                    manager.register(descriptor).unwrap();
                }
                bb(manager.layout().len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_checksums, bench_values, bench_placement);
criterion_main!(benches);
