//! meshgate.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_LOAD_ALERT_THRESHOLD: f64 = 10.0;
const DEFAULT_PROBE_PATH: &str = "/status";

/// Cooling period as a multiple of the request timeout.
const COOLING_FACTOR: f64 = 3.5;
/// Upper bound for every configured duration.
const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub terminator: TerminatorSection,
    #[serde(default)]
    pub services: Vec<ServiceSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySection {
    pub listen: Option<String>,
    pub request_timeout: Option<String>,
    pub default_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerSection {
    pub failure_threshold: Option<u32>,
    pub cooling_period: Option<String>,
    pub evict_on_trip: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSection {
    pub interval: Option<String>,
    pub sweep_interval: Option<String>,
    pub load_alert_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Replica addresses come from `[[services]].replicas`.
    #[default]
    Static,
    /// Replica addresses are resolved from DNS (`{name}:{port}`).
    Dns,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverySection {
    pub mode: Option<DiscoveryMode>,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminatorSection {
    /// Command prefix; the container reference is appended as the last argument.
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    pub name: String,
    pub probe_path: Option<String>,
    /// Port appended to DNS lookups in `dns` discovery mode.
    pub port: Option<u16>,
    #[serde(default)]
    pub replicas: Vec<String>,
}

impl ServiceSection {
    pub fn probe_path(&self) -> &str {
        self.probe_path.as_deref().unwrap_or(DEFAULT_PROBE_PATH)
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every duration parses and is in range, and service names are
    /// unique.
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("gateway.request_timeout", self.gateway.request_timeout.as_deref()),
            ("breaker.cooling_period", self.breaker.cooling_period.as_deref()),
            ("health.interval", self.health.interval.as_deref()),
            ("health.sweep_interval", self.health.sweep_interval.as_deref()),
            ("discovery.interval", self.discovery.interval.as_deref()),
        ];
        for (field, value) in durations {
            let Some(value) = value else { continue };
            let d = parse_duration(value)?;
            if d.is_zero() {
                anyhow::bail!("{field} must be greater than zero");
            }
            if d > MAX_DURATION {
                anyhow::bail!("{field} must be at most {}s, got {value:?}", MAX_DURATION.as_secs());
            }
        }

        if self.failure_threshold() == 0 {
            anyhow::bail!("breaker.failure_threshold must be at least 1");
        }

        let mut seen = std::collections::HashSet::new();
        for svc in &self.services {
            if !seen.insert(svc.name.as_str()) {
                anyhow::bail!("duplicate service definition: {}", svc.name);
            }
            if self.discovery_mode() == DiscoveryMode::Dns && svc.port.is_none() {
                anyhow::bail!("service {} needs a port for dns discovery", svc.name);
            }
        }
        Ok(())
    }

    pub fn listen(&self) -> &str {
        self.gateway.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    pub fn default_policy(&self) -> &str {
        self.gateway.default_policy.as_deref().unwrap_or("round_robin")
    }

    pub fn request_timeout(&self) -> Duration {
        duration_or(self.gateway.request_timeout.as_deref(), DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.breaker.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD)
    }

    /// Cooling period; defaults to 3.5× the request timeout.
    pub fn cooling_period(&self) -> Duration {
        let fallback = self.request_timeout().mul_f64(COOLING_FACTOR);
        duration_or(self.breaker.cooling_period.as_deref(), fallback)
    }

    pub fn evict_on_trip(&self) -> bool {
        self.breaker.evict_on_trip.unwrap_or(true)
    }

    pub fn health_interval(&self) -> Duration {
        duration_or(self.health.interval.as_deref(), DEFAULT_HEALTH_INTERVAL)
    }

    pub fn sweep_interval(&self) -> Duration {
        duration_or(self.health.sweep_interval.as_deref(), DEFAULT_SWEEP_INTERVAL)
    }

    pub fn load_alert_threshold(&self) -> f64 {
        self.health
            .load_alert_threshold
            .unwrap_or(DEFAULT_LOAD_ALERT_THRESHOLD)
    }

    pub fn discovery_mode(&self) -> DiscoveryMode {
        self.discovery.mode.unwrap_or_default()
    }

    pub fn discovery_interval(&self) -> Duration {
        duration_or(self.discovery.interval.as_deref(), DEFAULT_DISCOVERY_INTERVAL)
    }

    pub fn terminate_command(&self) -> Option<&[String]> {
        self.terminator
            .command
            .as_deref()
            .filter(|cmd| !cmd.is_empty())
    }
}

fn duration_or(value: Option<&str>, fallback: Duration) -> Duration {
    value
        .and_then(|s| parse_duration(s).ok())
        .filter(|d| !d.is_zero() && *d <= MAX_DURATION)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config.listen(), "0.0.0.0:8000");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.failure_threshold(), 3);
        assert_eq!(config.cooling_period(), Duration::from_millis(17_500));
        assert_eq!(config.health_interval(), Duration::from_secs(30));
        assert_eq!(config.discovery_interval(), Duration::from_secs(30));
        assert_eq!(config.discovery_mode(), DiscoveryMode::Static);
        assert!(config.evict_on_trip());
        assert!(config.terminate_command().is_none());
    }

    #[test]
    fn cooling_period_follows_request_timeout() {
        let config = GatewayConfig::from_toml_str(
            r#"
[gateway]
request_timeout = "2s"
"#,
        )
        .unwrap();
        assert_eq!(config.cooling_period(), Duration::from_secs(7));
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
[gateway]
listen = "127.0.0.1:9000"
default_policy = "least_loaded"

[breaker]
failure_threshold = 5
cooling_period = "1m"
evict_on_trip = false

[discovery]
mode = "dns"

[terminator]
command = ["docker", "rm", "-f"]

[[services]]
name = "sports-service"
port = 5001
replicas = ["172.19.0.7:5001", "172.19.0.8:5001"]
"#;
        let config = GatewayConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.listen(), "127.0.0.1:9000");
        assert_eq!(config.default_policy(), "least_loaded");
        assert_eq!(config.failure_threshold(), 5);
        assert_eq!(config.cooling_period(), Duration::from_secs(60));
        assert!(!config.evict_on_trip());
        assert_eq!(config.discovery_mode(), DiscoveryMode::Dns);
        assert_eq!(config.terminate_command().unwrap().len(), 3);
        assert_eq!(config.services[0].probe_path(), "/status");
        assert_eq!(config.services[0].replicas.len(), 2);
    }

    #[test]
    fn rejects_duplicate_services() {
        let toml_str = r#"
[[services]]
name = "a"
[[services]]
name = "a"
"#;
        assert!(GatewayConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn rejects_bad_duration() {
        let toml_str = r#"
[health]
interval = "often"
"#;
        assert!(GatewayConfig::from_toml_str(toml_str).is_err());
    }

    const DURATION_FIELDS: [(&str, &str); 5] = [
        ("gateway", "request_timeout"),
        ("breaker", "cooling_period"),
        ("health", "interval"),
        ("health", "sweep_interval"),
        ("discovery", "interval"),
    ];

    #[test]
    fn rejects_zero_durations() {
        for (section, key) in DURATION_FIELDS {
            for zero in ["0s", "0ms", "0m", "0"] {
                let toml_str = format!("[{section}]\n{key} = \"{zero}\"\n");
                let err = GatewayConfig::from_toml_str(&toml_str).unwrap_err();
                assert!(
                    err.to_string().contains("greater than zero"),
                    "{section}.{key} = {zero}: {err}"
                );
            }
        }
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let huge = format!("{}m", u64::MAX / 60 + 1);
        for (section, key) in DURATION_FIELDS {
            for value in ["86401s", "1441m", "18446744073709551615s", huge.as_str()] {
                let toml_str = format!("[{section}]\n{key} = \"{value}\"\n");
                assert!(
                    GatewayConfig::from_toml_str(&toml_str).is_err(),
                    "{section}.{key} = {value} accepted"
                );
            }
        }
    }

    #[test]
    fn accessors_fall_back_when_validation_is_bypassed() {
        let mut config = GatewayConfig::default();
        config.health.interval = Some("0s".to_string());
        config.gateway.request_timeout = Some("9999999999s".to_string());
        assert_eq!(config.health_interval(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.cooling_period(), Duration::from_millis(17_500));
    }

    #[test]
    fn accepts_durations_at_the_bound() {
        let config = GatewayConfig::from_toml_str(
            r#"
[gateway]
request_timeout = "86400s"
[health]
interval = "1440m"
sweep_interval = "1ms"
"#,
        )
        .unwrap();
        assert_eq!(config.health_interval(), Duration::from_secs(86_400));
        assert_eq!(config.sweep_interval(), Duration::from_millis(1));
        assert_eq!(config.cooling_period(), Duration::from_secs(302_400));
    }

    #[test]
    fn dns_mode_requires_port() {
        let toml_str = r#"
[discovery]
mode = "dns"
[[services]]
name = "a"
"#;
        assert!(GatewayConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = GatewayConfig::from_toml_str(
            r#"
[[services]]
name = "user-service"
replicas = ["10.0.0.1:5002"]
"#,
        )
        .unwrap();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("user-service"));
    }
}
