use basalt::protocol::{decode_client_packet, encode_server_packet, ServerPacket};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn transform_wire() -> Vec<u8> {
    let mut wire = vec![0x0D];
    for value in &[100.5f64, 64.0, 65.62, -220.25] {
        wire.extend_from_slice(&value.to_bits().to_be_bytes());
    }
    wire.extend_from_slice(&90.0f32.to_bits().to_be_bytes());
    wire.extend_from_slice(&(-5.5f32).to_bits().to_be_bytes());
    wire.push(0x01);
    wire
}

fn bench_decode(c: &mut Criterion) {
    let wire = transform_wire();

    c.bench_function("decode_player_transform", |b| {
        b.iter(|| decode_client_packet(black_box(&wire)))
    });
}

fn bench_encode(c: &mut Criterion) {
    let packet = ServerPacket::PlayerTransform {
        x: 100.5,
        y: 64.0,
        head_y: 65.62,
        z: -220.25,
        yaw: 90.0,
        pitch: -5.5,
        grounded: true,
    };
    let mut buffer = vec![0u8; packet.encoded_len()];

    c.bench_function("encode_player_transform", |b| {
        b.iter(|| encode_server_packet(black_box(&packet), &mut buffer))
    });
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
