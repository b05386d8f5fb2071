//! End-to-end exposition rendering
//!
//! Verifies the exact lines a scrape produces for a known snapshot and
//! that re-parsing the output recovers the same numeric values.

use pganalytics::exporter::{ExpositionBuffer, render_all, render_tenant, required_capacity};
use pganalytics::snapshot::MetricsSnapshot;
use pganalytics::source::StatSample;

fn acme_snapshot() -> MetricsSnapshot {
    MetricsSnapshot::from_sample(
        &StatSample {
            total_connections: Some(12),
            active_connections: Some(4),
            cache_hit_ratio: Some(97.5),
            is_primary: true,
            ..StatSample::default()
        },
        1_700_000_000,
    )
}

#[test]
fn test_acme_renders_expected_lines() {
    let snapshot = acme_snapshot();
    let mut buf = ExpositionBuffer::with_capacity(required_capacity(&["acme"]));
    render_tenant("acme", &snapshot, &mut buf).expect("render should succeed");

    let lines: Vec<&str> = buf.as_str().lines().collect();
    assert!(lines.contains(&"pganalytics_total_connections{tenant=\"acme\"} 12"));
    assert!(lines.contains(&"pganalytics_active_connections{tenant=\"acme\"} 4"));
    assert!(lines.contains(&"pganalytics_cache_hit_ratio{tenant=\"acme\"} 97.50"));
    assert!(lines.contains(&"pganalytics_database_connected{tenant=\"acme\"} 1"));
}

#[test]
fn test_round_trip_recovers_values() {
    let snapshot = acme_snapshot();
    let mut buf = ExpositionBuffer::with_capacity(required_capacity(&["acme"]));
    render_tenant("acme", &snapshot, &mut buf).unwrap();

    let mut total = None;
    let mut active = None;
    let mut ratio = None;
    for line in buf.as_str().lines().filter(|l| !l.starts_with('#')) {
        let (name, value) = line.split_once(' ').expect("sample line has a value");
        let metric = name.split('{').next().unwrap();
        match metric {
            "pganalytics_total_connections" => total = Some(value.parse::<i64>().unwrap()),
            "pganalytics_active_connections" => active = Some(value.parse::<i64>().unwrap()),
            "pganalytics_cache_hit_ratio" => ratio = Some(value.parse::<f64>().unwrap()),
            _ => {}
        }
    }

    assert_eq!(total, Some(12));
    assert_eq!(active, Some(4));
    assert!((ratio.unwrap() - 97.5).abs() < 0.005);
}

#[test]
fn test_every_sample_line_carries_the_tenant_label() {
    let entries = vec![
        ("acme".to_string(), acme_snapshot()),
        ("beta".to_string(), acme_snapshot()),
    ];
    let mut buf = ExpositionBuffer::with_capacity(required_capacity(&["acme", "beta"]));
    render_all(&entries, &mut buf).unwrap();

    for line in buf.as_str().lines().filter(|l| !l.starts_with('#')) {
        assert!(
            line.contains("{tenant=\"acme\"}") || line.contains("{tenant=\"beta\"}"),
            "sample line without tenant label: {}",
            line
        );
    }
}

#[test]
fn test_headers_precede_samples_and_appear_once() {
    let entries = vec![
        ("acme".to_string(), acme_snapshot()),
        ("beta".to_string(), acme_snapshot()),
    ];
    let mut buf = ExpositionBuffer::with_capacity(required_capacity(&["acme", "beta"]));
    render_all(&entries, &mut buf).unwrap();

    let lines: Vec<&str> = buf.as_str().lines().collect();
    let help_idx = lines
        .iter()
        .position(|l| *l == "# HELP pganalytics_total_connections Total backend connections")
        .expect("HELP header present");
    let type_idx = lines
        .iter()
        .position(|l| *l == "# TYPE pganalytics_total_connections gauge")
        .expect("TYPE header present");
    let first_sample = lines
        .iter()
        .position(|l| l.starts_with("pganalytics_total_connections{"))
        .expect("sample line present");

    assert!(help_idx < type_idx);
    assert!(type_idx < first_sample);

    let type_count = lines
        .iter()
        .filter(|l| l.starts_with("# TYPE pganalytics_total_connections "))
        .count();
    assert_eq!(type_count, 1, "TYPE emitted once per metric name, not per tenant");
}

#[test]
fn test_disconnected_snapshot_renders_connected_zero() {
    let degraded = MetricsSnapshot::degraded_from(Some(&acme_snapshot()), 1_700_000_100);
    let mut buf = ExpositionBuffer::with_capacity(required_capacity(&["acme"]));
    render_tenant("acme", &degraded, &mut buf).unwrap();

    let out = buf.as_str();
    assert!(out.contains("pganalytics_database_connected{tenant=\"acme\"} 0\n"));
    // Last known good values still render
    assert!(out.contains("pganalytics_total_connections{tenant=\"acme\"} 12\n"));
    assert!(out.contains("pganalytics_last_update{tenant=\"acme\"} 1700000100\n"));
}

#[test]
fn test_output_is_byte_identical_across_renders() {
    let entries = vec![
        ("acme".to_string(), acme_snapshot()),
        ("beta".to_string(), acme_snapshot()),
    ];

    let render_once = || {
        let mut buf = ExpositionBuffer::with_capacity(required_capacity(&["acme", "beta"]));
        render_all(&entries, &mut buf).unwrap();
        buf.into_string()
    };

    assert_eq!(render_once(), render_once());
}
