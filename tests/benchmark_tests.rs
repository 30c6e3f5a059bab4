//! Performance benchmarks for the hot paths of the session core

use assert_approx_eq::assert_approx_eq;
use server::client_manager::{ClientKind, ClientManager};
use server::relay::RelaySession;
use server::PeerId;
use shared::{Field, Frame, PacketFields, PacketReader, PacketWriter, MAX_FILE_SIZE};
use std::time::Instant;

/// Benchmarks compressed int encoding across all three widths
#[test]
fn benchmark_int_codec() {
    let values = [0, 100, -100, 1_000, -30_000, 70_000, i32::MIN, i32::MAX];

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut writer = PacketWriter::new();
        for &v in &values {
            writer.put_int(v);
        }
        let mut reader = PacketReader::new(writer.as_slice());
        for &v in &values {
            assert_eq!(reader.get_int(), v);
        }
    }

    let duration = start.elapsed();
    println!(
        "Int codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks float encoding and checks precision survives
#[test]
fn benchmark_float_codec() {
    let iterations = 100_000;
    let start = Instant::now();

    let mut last = 0.0;
    for i in 0..iterations {
        let mut writer = PacketWriter::new();
        writer.put_float(i as f32 * 0.25);
        last = PacketReader::new(writer.as_slice()).get_float();
    }

    let duration = start.elapsed();
    println!(
        "Float codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_approx_eq!(last, (iterations - 1) as f32 * 0.25);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks building a typical game packet from a field list
#[test]
fn benchmark_field_encoding() {
    let positions: Vec<i32> = (0..32).collect();
    let blob = [7u8; 64];

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let packet = PacketFields::new()
            .reliable()
            .int(12)
            .ints(&positions)
            .float(0.5)
            .string("player name")
            .bytes(&blob)
            .encode();
        assert!(packet.is_reliable());
    }

    let duration = start.elapsed();
    println!(
        "Field encoding: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks parsing legacy format strings
#[test]
fn benchmark_format_parsing() {
    let args = [
        Field::Int(3),
        Field::Int(1),
        Field::Int(2),
        Field::Int(3),
        Field::Float(1.5),
        Field::Str("text"),
    ];

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let fields = PacketFields::from_format("rxi3fs", &args).unwrap();
        assert_eq!(fields.excluded(), Some(3));
    }

    let duration = start.elapsed();
    println!(
        "Format parsing: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks transport frame encoding and decoding
#[test]
fn benchmark_frame_codec() {
    let frame = Frame::Data {
        channel: 1,
        reliable: true,
        payload: vec![42u8; 1400],
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = frame.encode().unwrap();
        let decoded = Frame::decode(&bytes[4..]).unwrap();
        assert_eq!(decoded, frame);
    }

    let duration = start.elapsed();
    println!(
        "Frame codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests slot allocation under heavy connect/disconnect churn
#[test]
fn stress_test_slot_churn() {
    let mut session = RelaySession::new("bench", 128);
    let mut manager = ClientManager::new();

    let iterations = 100_000u32;
    let start = Instant::now();

    for i in 0..iterations {
        let slot = manager
            .add_client(ClientKind::Remote(PeerId(i)), "10.0.0.1", &mut session)
            .unwrap();
        if i % 3 != 0 {
            manager.remove_client(slot, &mut session);
        }
        if manager.remote_count() >= 100 {
            for slot in manager.remote_slots() {
                manager.remove_client(slot, &mut session);
            }
        }
    }

    let duration = start.elapsed();
    println!(
        "Slot churn: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(manager.len() <= 100);
    assert_eq!(manager.remote_count(), manager.iter().count());
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks writing a maximal file payload in place
#[test]
fn benchmark_large_file_packet() {
    let body = vec![1u8; MAX_FILE_SIZE];

    let start = Instant::now();
    let mut writer = PacketWriter::with_capacity(MAX_FILE_SIZE + 16);
    writer.put_int(MAX_FILE_SIZE as i32);
    writer.reserve_tail(MAX_FILE_SIZE).copy_from_slice(&body);
    let packet = writer.finish(true);
    let duration = start.elapsed();

    println!("Large file packet: {} bytes in {:?}", packet.len(), duration);

    let mut reader = packet.reader();
    assert_eq!(reader.get_int(), MAX_FILE_SIZE as i32);
    assert_eq!(reader.remaining(), MAX_FILE_SIZE);
    assert!(duration.as_millis() < 1000);
}
