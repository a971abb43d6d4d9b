//! Process-wide configuration, read once at startup.
//!
//! Mirrors the teacher corpus's pattern of folding CLI flags and environment
//! variables into a single config struct handed to every reconciler/handler
//! (see `original_source/cmd/operator/cmd/start.go` and the `DiskPool`
//! operator's `OperatorContext`).

use std::time::Duration;

use clap::Parser;

fn default_core_namespace() -> String {
    std::env::var("CORE_NAMESPACE").unwrap_or_else(|_| "imperator-system".to_string())
}

fn envtest_enabled() -> bool {
    std::env::var("ENVTEST")
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Command-line flags, parsed once in `main`.
///
/// Field set mirrors spec.md §6's "CLI/flags" surface: metrics address,
/// health-probe address, leader-election toggle + ID, reconcile sync period,
/// webhook port, webhook TLS certificate directory.
#[derive(Debug, Clone, Parser)]
#[command(name = "imperator", about = "Cluster workload-shaping controller")]
pub struct Cli {
    /// Address the metrics endpoint binds to.
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: String,

    /// Address the health-probe endpoint binds to.
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: String,

    /// Enable leader election so only one replica reconciles at a time.
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    /// Identity used when acquiring the leader-election lease.
    #[arg(long, env = "LEADER_ELECTION_ID", default_value = "imperator-leader")]
    pub leader_election_id: String,

    /// Fallback full-resync period for every watched resource.
    #[arg(long, env = "SYNC_PERIOD", default_value = "10m")]
    pub sync_period: String,

    /// Port the mutating/validating admission webhook server listens on.
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 9443)]
    pub webhook_port: u16,

    /// Directory containing the webhook server's TLS certificate and key.
    #[arg(long, env = "WEBHOOK_CERT_DIR", default_value = "/tmp/k8s-webhook-server/serving-certs")]
    pub webhook_cert_dir: String,
}

impl Cli {
    pub fn sync_period_duration(&self) -> Duration {
        self.sync_period
            .parse::<humantime::Duration>()
            .map(Into::into)
            .unwrap_or(Duration::from_secs(600))
    }
}

/// Runtime configuration derived from `Cli` plus process environment.
///
/// Read once at startup, as required by spec.md §9's "Global state" note —
/// neither the `envtest` sentinel nor `core_namespace` may be re-read mid-run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace where placeholder StatefulSets and Services live.
    pub core_namespace: String,
    /// Relaxes the `not-ready` taint rule for integration tests lacking a kubelet heartbeat.
    pub envtest: bool,
    pub sync_period: Duration,
    pub leader_elect: bool,
    pub leader_election_id: String,
}

impl Config {
    pub fn from_env_and_cli(cli: &Cli) -> Self {
        Self {
            core_namespace: default_core_namespace(),
            envtest: envtest_enabled(),
            sync_period: cli.sync_period_duration(),
            leader_elect: cli.leader_elect,
            leader_election_id: cli.leader_election_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_period_parses_humantime() {
        let cli = Cli {
            metrics_bind_address: "x".into(),
            health_probe_bind_address: "x".into(),
            leader_elect: false,
            leader_election_id: "x".into(),
            sync_period: "5m".into(),
            webhook_port: 1,
            webhook_cert_dir: "x".into(),
        };
        assert_eq!(cli.sync_period_duration(), Duration::from_secs(300));
    }

    #[test]
    fn sync_period_falls_back_on_garbage() {
        let cli = Cli {
            metrics_bind_address: "x".into(),
            health_probe_bind_address: "x".into(),
            leader_elect: false,
            leader_election_id: "x".into(),
            sync_period: "not-a-duration".into(),
            webhook_port: 1,
            webhook_cert_dir: "x".into(),
        };
        assert_eq!(cli.sync_period_duration(), Duration::from_secs(600));
    }
}
