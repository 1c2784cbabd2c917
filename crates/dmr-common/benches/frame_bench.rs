use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dmr_common::crypto::obp_key;
use dmr_common::frame::{Dmrd, FrameBits, HbpFrame};
use dmr_common::lc::{apply_full_lc, BptcLcCodec, Lc, LcCodec};
use dmr_common::openbridge::{decode, encode_data, ObpEnvelope};
use dmr_common::types::Slot;

fn burst() -> Dmrd {
    Dmrd {
        seq: 7,
        rf_src: 3_120_101,
        dst: 91,
        peer: 312_010_101,
        bits: FrameBits::voice_header(Slot::One),
        stream_id: 0xDEAD_BEEF,
        payload: [0xAB; 33],
        ber: 0,
        rssi: 0,
    }
}

fn envelope() -> ObpEnvelope {
    ObpEnvelope {
        server_id: 2341,
        timestamp_ns: 1_700_000_000_000_000_000,
        hops: 1,
        source_server: 2341,
        source_repeater: 234_100_101,
    }
}

fn bench_dmrd_serialize(c: &mut Criterion) {
    let frame = burst();
    c.bench_function("dmrd_serialize", |b| {
        b.iter(|| black_box(frame.serialize()));
    });
}

fn bench_dmrd_parse(c: &mut Criterion) {
    let bytes = burst().serialize();
    c.bench_function("dmrd_parse", |b| {
        b.iter(|| black_box(HbpFrame::parse(&bytes).unwrap()));
    });
}

fn bench_obp_v1_encode(c: &mut Criterion) {
    let key = obp_key(b"passphrase");
    let frame = burst();
    let env = envelope();
    c.bench_function("obp_v1_encode", |b| {
        b.iter(|| black_box(encode_data(&frame, 1, &key, &env)));
    });
}

fn bench_obp_v5_roundtrip(c: &mut Criterion) {
    let key = obp_key(b"passphrase");
    let frame = burst();
    let env = envelope();
    c.bench_function("obp_v5_encode_decode", |b| {
        b.iter(|| {
            let wire = encode_data(&frame, 5, &key, &env);
            black_box(decode(&wire, &key, 5).unwrap())
        });
    });
}

fn bench_header_lc_rewrite(c: &mut Criterion) {
    let codec = BptcLcCodec;
    let lc = Lc::group(235, 3_120_101);
    let mut payload = [0u8; 33];
    c.bench_function("header_lc_rewrite", |b| {
        b.iter(|| {
            apply_full_lc(&mut payload, &codec.encode_header_lc(&lc));
            black_box(&payload);
        });
    });
}

criterion_group!(
    benches,
    bench_dmrd_serialize,
    bench_dmrd_parse,
    bench_obp_v1_encode,
    bench_obp_v5_roundtrip,
    bench_header_lc_rewrite,
);
criterion_main!(benches);
