//! Protocol encoding/decoding benchmarks.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use prpc_client::{LoadBalancer, LoadBalancerKind};
use prpc_protocol::{
    encode_frame, Frame, FrameReader, FrameWriter, Message, PacketHeader, RpcMeta,
    DEFAULT_MAX_BODY_SIZE,
};
use tokio::runtime::Runtime;

fn bench_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_header");
    let header = PacketHeader::new(24, 1000).unwrap();
    let raw = header.marshal();

    group.bench_function("marshal", |b| b.iter(|| black_box(header.marshal())));
    group.bench_function("unmarshal", |b| {
        b.iter(|| black_box(PacketHeader::unmarshal(&raw).unwrap()))
    });

    group.finish();
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");
    let meta = RpcMeta::for_request("EchoService", "Echo", 1);

    for size in [100, 1000, 10000] {
        let payload = "x".repeat(size);
        let mut buf = BytesMut::with_capacity(size + 64);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                buf.clear();
                encode_frame(&meta, payload, &mut buf).unwrap();
                black_box(buf.len())
            });
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let frame = Frame::new(
            RpcMeta::for_response(1, 0, ""),
            Bytes::from("x".repeat(size).encode_to_vec()),
        );
        let encoded = frame.encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_stream_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("stream_roundtrip");

    for size in [100, 10000] {
        let payload = "x".repeat(size);
        let meta = RpcMeta::for_request("EchoService", "Echo", 1);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async {
                let (client, server) = tokio::io::duplex(64 * 1024);
                let mut writer = FrameWriter::new(client);
                let mut reader = FrameReader::new(server);
                writer.write_message(&meta, payload).await.unwrap();
                black_box(reader.read_meta().await.unwrap());
                black_box(reader.read_payload::<String>().await.unwrap())
            });
        });
    }

    group.finish();
}

fn bench_meta_encode(c: &mut Criterion) {
    let meta = RpcMeta::for_request("EchoService", "Echo", 123456789).with_timeout_ms(500);
    c.bench_function("meta_encode", |b| b.iter(|| black_box(meta.encode_to_vec())));
}

fn bench_balancer(c: &mut Criterion) {
    let mut group = c.benchmark_group("balancer_select");
    let ids: Vec<String> = (0..16).map(|i| format!("10.0.0.{}:8170", i)).collect();

    for kind in [
        LoadBalancerKind::RoundRobin,
        LoadBalancerKind::Random,
        LoadBalancerKind::ConsistentHash,
    ] {
        let lb = LoadBalancer::new(kind);
        group.bench_function(kind.as_str(), |b| {
            b.iter(|| black_box(lb.select(&ids, Some(&b"user-12345"[..]))))
        });
    }

    group.finish();
}

fn bench_rendezvous_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendezvous_select");
    let lb = LoadBalancer::new(LoadBalancerKind::ConsistentHash);

    for backends in [2, 8, 32, 128] {
        let ids: Vec<String> = (0..backends)
            .map(|i| format!("10.0.{}.{}:8170", i / 256, i % 256))
            .collect();

        group.throughput(Throughput::Elements(backends as u64));
        group.bench_with_input(BenchmarkId::from_parameter(backends), &ids, |b, ids| {
            b.iter(|| black_box(lb.select(ids, Some(&b"user-12345"[..]))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_header,
    bench_frame_encode,
    bench_frame_decode,
    bench_stream_roundtrip,
    bench_meta_encode,
    bench_balancer,
    bench_rendezvous_scaling,
);

criterion_main!(benches);
