//! Prometheus text exposition format.
//!
//! Counters come from a `MetricsSnapshot`; breaker and load gauges are
//! read from the registry view at render time.

use std::fmt::Write;

use meshgate_registry::{BreakerState, ServiceDefinition};

use crate::collector::MetricsSnapshot;

/// Render counters and per-replica gauges into Prometheus text format.
pub fn render_prometheus(snapshot: &MetricsSnapshot, services: &[ServiceDefinition]) -> String {
    let mut out = String::new();

    header(&mut out, "meshgate_replica_failures_total", "counter", "Failed probes and requests per replica.");
    for r in &snapshot.replicas {
        let _ = writeln!(
            out,
            "meshgate_replica_failures_total{{service=\"{}\",address=\"{}\"}} {}",
            r.service, r.address, r.failures
        );
    }

    header(&mut out, "meshgate_breaker_trips_total", "counter", "Circuit breaker trips per replica.");
    for r in &snapshot.replicas {
        let _ = writeln!(
            out,
            "meshgate_breaker_trips_total{{service=\"{}\",address=\"{}\"}} {}",
            r.service, r.address, r.trips
        );
    }

    header(&mut out, "meshgate_breaker_open", "gauge", "1 if the replica's breaker is open.");
    for (svc, replica) in replicas(services) {
        let open = u8::from(replica.breaker_state == BreakerState::Open);
        let _ = writeln!(
            out,
            "meshgate_breaker_open{{service=\"{}\",address=\"{}\"}} {}",
            svc, replica.address, open
        );
    }

    header(&mut out, "meshgate_replica_consecutive_failures", "gauge", "Current failure streak per replica.");
    for (svc, replica) in replicas(services) {
        let _ = writeln!(
            out,
            "meshgate_replica_consecutive_failures{{service=\"{}\",address=\"{}\"}} {}",
            svc, replica.address, replica.consecutive_failures
        );
    }

    header(&mut out, "meshgate_replica_load", "gauge", "Last reported load (+Inf when unavailable).");
    for (svc, replica) in replicas(services) {
        let load = if replica.current_load.is_finite() {
            format!("{:.2}", replica.current_load)
        } else {
            "+Inf".to_string()
        };
        let _ = writeln!(
            out,
            "meshgate_replica_load{{service=\"{}\",address=\"{}\"}} {}",
            svc, replica.address, load
        );
    }

    header(&mut out, "meshgate_evictions_total", "counter", "Replicas evicted after a breaker trip.");
    let _ = writeln!(out, "meshgate_evictions_total {}", snapshot.evictions);

    header(&mut out, "meshgate_termination_failures_total", "counter", "Evictions whose teardown failed.");
    let _ = writeln!(out, "meshgate_termination_failures_total {}", snapshot.termination_failures);

    header(&mut out, "meshgate_sagas_total", "counter", "Finished sagas by outcome.");
    let _ = writeln!(out, "meshgate_sagas_total{{status=\"completed\"}} {}", snapshot.sagas_completed);
    let _ = writeln!(out, "meshgate_sagas_total{{status=\"failed\"}} {}", snapshot.sagas_failed);

    header(&mut out, "meshgate_compensation_failures_total", "counter", "Compensating actions that failed.");
    let _ = writeln!(out, "meshgate_compensation_failures_total {}", snapshot.compensation_failures);

    out
}

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn replicas(
    services: &[ServiceDefinition],
) -> impl Iterator<Item = (&str, &meshgate_registry::ReplicaRecord)> {
    services
        .iter()
        .flat_map(|s| s.replicas.iter().map(move |r| (s.name.as_str(), r)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::GatewayMetrics;
    use meshgate_registry::ReplicaRecord;

    fn test_service() -> ServiceDefinition {
        let mut open = ReplicaRecord::new("10.0.0.2:5001", "ctr-2");
        open.breaker_state = BreakerState::Open;
        open.consecutive_failures = 3;
        open.current_load = f64::INFINITY;

        let mut healthy = ReplicaRecord::new("10.0.0.1:5001", "ctr-1");
        healthy.current_load = 4.0;

        ServiceDefinition {
            name: "sports-service".to_string(),
            probe_path: "/status".to_string(),
            replicas: vec![healthy, open],
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&MetricsSnapshot::default(), &[]);
        assert!(output.contains("# TYPE meshgate_breaker_trips_total counter"));
        assert!(output.contains("meshgate_evictions_total 0"));
    }

    #[test]
    fn render_replica_gauges() {
        let output = render_prometheus(&MetricsSnapshot::default(), &[test_service()]);

        assert!(output.contains(
            "meshgate_breaker_open{service=\"sports-service\",address=\"10.0.0.2:5001\"} 1"
        ));
        assert!(output.contains(
            "meshgate_breaker_open{service=\"sports-service\",address=\"10.0.0.1:5001\"} 0"
        ));
        assert!(output.contains(
            "meshgate_replica_consecutive_failures{service=\"sports-service\",address=\"10.0.0.2:5001\"} 3"
        ));
        assert!(output.contains(
            "meshgate_replica_load{service=\"sports-service\",address=\"10.0.0.1:5001\"} 4.00"
        ));
        assert!(output.contains(
            "meshgate_replica_load{service=\"sports-service\",address=\"10.0.0.2:5001\"} +Inf"
        ));
    }

    #[test]
    fn render_counters() {
        let metrics = GatewayMetrics::new();
        metrics.record_failure("sports-service", "10.0.0.2:5001");
        metrics.record_trip("sports-service", "10.0.0.2:5001");
        metrics.record_eviction(false);
        metrics.record_saga(false, 1);

        let output = render_prometheus(&metrics.snapshot(), &[]);
        assert!(output.contains(
            "meshgate_breaker_trips_total{service=\"sports-service\",address=\"10.0.0.2:5001\"} 1"
        ));
        assert!(output.contains("meshgate_termination_failures_total 1"));
        assert!(output.contains("meshgate_sagas_total{status=\"failed\"} 1"));
        assert!(output.contains("meshgate_compensation_failures_total 1"));
    }

    #[test]
    fn every_sample_line_has_a_value() {
        let output = render_prometheus(&MetricsSnapshot::default(), &[test_service()]);
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert_eq!(line.split_whitespace().count(), 2, "bad sample line: {line}");
        }
    }
}
