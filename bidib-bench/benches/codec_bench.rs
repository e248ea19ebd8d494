//! Wire codec benchmarks.

use bidib_protocol::{
    crc8, encode_packet, escape, unescape, Message, MessageType, NodeAddress, PacketAssembler,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn create_test_messages(count: usize, payload_size: usize) -> Vec<Message> {
    let address: NodeAddress = "1.4".parse().unwrap();
    (0..count)
        .map(|i| {
            Message::new(address, MessageType::new(0x38))
                .with_seq((i % 255) as u8 + 1)
                .with_payload(vec![0xFEu8; payload_size])
        })
        .collect()
}

fn bench_escape(c: &mut Criterion) {
    let mut group = c.benchmark_group("escape");

    for size in [16, 64, 256] {
        // Every other byte needs stuffing.
        let data: Vec<u8> = (0..size)
            .map(|i| if i % 2 == 0 { 0xFE } else { 0x42 })
            .collect();
        let escaped = escape(&data);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("escape", size), &data, |b, data| {
            b.iter(|| black_box(escape(data)));
        });
        group.bench_with_input(BenchmarkId::new("unescape", size), &escaped, |b, escaped| {
            b.iter(|| black_box(unescape(escaped).unwrap()));
        });
    }

    group.finish();
}

fn bench_crc8(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc8");

    for size in [16, 64, 256] {
        let data = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(crc8(data)));
        });
    }

    group.finish();
}

fn bench_packet_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode");

    for count in [1, 4, 8] {
        let messages = create_test_messages(count, 4);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(count),
            &messages,
            |b, messages| {
                b.iter(|| black_box(encode_packet(messages).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_assembler(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembler");

    for count in [1, 4, 8] {
        let packet = encode_packet(&create_test_messages(count, 4)).unwrap();

        group.throughput(Throughput::Bytes(packet.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &packet, |b, packet| {
            b.iter(|| {
                let mut assembler = PacketAssembler::new();
                black_box(assembler.push_slice(packet))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_escape,
    bench_crc8,
    bench_packet_encode,
    bench_assembler,
);

criterion_main!(benches);
