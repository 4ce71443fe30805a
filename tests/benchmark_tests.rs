//! Performance benchmarks for hot session and client paths

use arcade_client::interpolation::{InterpolationConfig, InterpolationMode, Interpolator};
use arcade_client::prediction::Predictor;
use arcade_server::collection::EntityCollection;
use arcade_server::games::grazer::{self, ArenaEntity, ArenaKind, GrazerSettings};
use arcade_server::harness::TestHarness;
use arcade_shared::{FieldMap, FieldValue, InputPackage, Packet, Payload};
use std::time::Instant;

fn grid_of_food(count: usize) -> EntityCollection<ArenaEntity> {
    let mut entities = EntityCollection::new();
    for i in 0..count {
        let x = (i % 40) as f32 * 20.0;
        let y = (i / 40) as f32 * 20.0;
        entities.insert(ArenaEntity::food(x, y, 1)).unwrap();
    }
    entities
}

/// Benchmarks nearest-entity queries
#[test]
fn benchmark_nearest_entity() {
    let entities = grid_of_food(1000);

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let point = ((i % 800) as f32, (i % 600) as f32);
        let _ = entities.nearest(ArenaKind::Food, point, |_| false);
    }

    let duration = start.elapsed();
    println!(
        "Nearest entity: {} queries over {} entities in {:?} ({:.2} μs/query)",
        iterations,
        entities.len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks full session ticks with a populated arena
#[test]
fn benchmark_session_tick() {
    let definition = grazer::definition(GrazerSettings {
        food_count: 200,
        fill_target: 10,
        seed: Some(1),
        ..GrazerSettings::default()
    })
    .unwrap();
    let mut harness = TestHarness::new(definition);

    let iterations = 1_000;
    let start = Instant::now();

    harness.step(iterations).unwrap();

    let duration = start.elapsed();
    println!(
        "Session tick: {} ticks with {} entities in {:?} ({:.2} μs/tick)",
        iterations,
        harness.entities().len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks state packet serialization for a busy session
#[test]
fn benchmark_packet_serialization() {
    use bincode::{deserialize, serialize};

    let definition = grazer::definition(GrazerSettings {
        food_count: 50,
        fill_target: 10,
        seed: Some(1),
        ..GrazerSettings::default()
    })
    .unwrap();
    let mut harness = TestHarness::new(definition);
    harness.step(1).unwrap();
    let packet = harness.session().snapshot();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let serialized = serialize(&packet).unwrap();
        let _deserialized: Packet = deserialize(&serialized).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Packet serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks interpolation over a full snapshot buffer
#[test]
fn benchmark_interpolation() {
    for mode in [InterpolationMode::Linear, InterpolationMode::Hermite] {
        let config = InterpolationConfig::default()
            .with_mode(mode)
            .angular("heading", std::f32::consts::TAU);
        let mut interpolator = Interpolator::new(config);

        for i in 0..32u64 {
            let mut fields = FieldMap::new();
            fields.insert("x".into(), FieldValue::Float(i as f32));
            fields.insert("y".into(), FieldValue::Float(i as f32 * 2.0));
            fields.insert("heading".into(), FieldValue::Float(i as f32 * 0.3));
            interpolator.push_snapshot(1000 + i * 50, fields);
        }

        let iterations = 100_000;
        let start = Instant::now();

        for i in 0..iterations {
            let now = 1100 + (i % 1500) as u64;
            let _ = interpolator.get_interpolated(now);
        }

        let duration = start.elapsed();
        println!(
            "Interpolation ({:?}): {} iterations in {:?} ({:.2} ns/iter)",
            mode,
            iterations,
            duration,
            duration.as_nanos() as f64 / iterations as f64
        );

        // Should complete in under 2 seconds
        assert!(duration.as_millis() < 2000);
    }
}

/// Benchmarks replaying a backlog of unconfirmed inputs
#[test]
fn benchmark_client_prediction() {
    let predictor = Predictor::new(
        |state: &FieldMap, input: &InputPackage| {
            let mut next = state.clone();
            let x = state.get("x").and_then(FieldValue::as_f32).unwrap_or(0.0);
            let dx = input.payload.float("dx").unwrap_or(0.0);
            next.insert("x".into(), FieldValue::Float(x + dx));
            next
        },
        6,
    );

    let inputs: Vec<InputPackage> = (1..=60)
        .map(|sequence| InputPackage {
            sequence,
            timestamp: sequence as u64 * 16,
            payload: Payload::new().with("dx", 1.0f32),
        })
        .collect();
    let mut server_state = FieldMap::new();
    server_state.insert("x".into(), FieldValue::Float(0.0));

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let predicted = predictor.predict(&server_state, &inputs);
        assert_eq!(predicted.get("x"), Some(&FieldValue::Float(60.0)));
    }

    let duration = start.elapsed();
    println!(
        "Client prediction: {} replays of {} inputs in {:?}",
        iterations,
        inputs.len(),
        duration
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
