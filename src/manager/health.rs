//! Endpoint health probing
//!
//! Each endpoint gets its own background probe task: a fixed interval while
//! healthy, bounded exponential backoff with jitter after failures. Probe
//! results are the only writer of an endpoint's runtime status; execution
//! paths may nudge a probe forward but never flip status themselves.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;

use super::{EndpointManager, ManagedEndpoint};

/// Runtime status of an endpoint, owned by the probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Active,
    Inactive,
    Degraded,
}

/// Point-in-time view of an endpoint's health.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: RuntimeStatus,
    pub consecutive_failures: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl HealthSnapshot {
    pub fn starting(status: RuntimeStatus) -> Self {
        Self {
            status,
            consecutive_failures: 0,
            last_probe_at: None,
            last_success_at: None,
            latency_ms: None,
            last_error: None,
        }
    }
}

/// Delay before the next probe after `failures` consecutive failures:
/// `base * 2^(failures-1)` capped, plus up to 25% jitter so a fleet of
/// gateways does not probe in lockstep.
pub(super) fn backoff_delay(config: &HealthConfig, failures: u32) -> Duration {
    let base = config.backoff_base_ms.max(1);
    let exponent = failures.saturating_sub(1).min(16);
    let raw = base.saturating_mul(1u64 << exponent);
    let capped = raw.min(config.backoff_cap_ms.max(base));
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped + jitter)
}

/// Spawn the background probe task for one endpoint. The task ends when the
/// manager's shutdown signal fires; endpoints declared inactive are never
/// probed.
pub(super) fn spawn_probe_task(manager: &Arc<EndpointManager>, endpoint: Arc<ManagedEndpoint>) {
    let config = manager.health_config().clone();
    let mut shutdown = manager.subscribe_shutdown();

    tokio::spawn(async move {
        {
            let health = endpoint.health.read().await;
            if health.status == RuntimeStatus::Inactive {
                debug!(endpoint = %endpoint.name(), "Endpoint declared inactive, not probing");
                return;
            }
        }

        loop {
            endpoint.probe(&config).await;

            let failures = endpoint.health.read().await.consecutive_failures;
            let delay = if failures == 0 {
                Duration::from_secs(config.probe_interval_secs)
            } else {
                backoff_delay(&config, failures)
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = endpoint.probe_nudge.notified() => {
                    debug!(endpoint = %endpoint.name(), "Probe nudged forward");
                }
                _ = shutdown.changed() => {
                    debug!(endpoint = %endpoint.name(), "Probe task stopping");
                    return;
                }
            }
        }
    });
}

impl ManagedEndpoint {
    /// Run one liveness probe and fold the result into the health snapshot.
    /// Probes are serialized per endpoint; concurrent callers queue here.
    pub(super) async fn probe(&self, config: &HealthConfig) {
        let _serialized = self.probe_lock.lock().await;

        let deadline = Duration::from_millis(config.probe_timeout_ms);
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(deadline, async {
            let session = self.driver.open_session().await?;
            session.ping().await
        })
        .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        let now = Utc::now();
        let mut health = self.health.write().await;
        health.last_probe_at = Some(now);

        match outcome {
            Ok(Ok(())) => {
                let recovered = health.status == RuntimeStatus::Degraded;
                health.status = RuntimeStatus::Active;
                health.consecutive_failures = 0;
                health.last_success_at = Some(now);
                health.latency_ms = Some(latency_ms);
                health.last_error = None;
                if recovered {
                    info!(endpoint = %self.name(), latency_ms, "Endpoint recovered");
                } else {
                    debug!(endpoint = %self.name(), latency_ms, "Probe ok");
                }
            }
            outcome => {
                let reason = match outcome {
                    Ok(Err(e)) => e.to_string(),
                    _ => format!("probe timed out after {}ms", config.probe_timeout_ms),
                };
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.latency_ms = None;
                health.last_error = Some(reason.clone());
                if health.consecutive_failures >= config.degraded_threshold
                    && health.status == RuntimeStatus::Active
                {
                    health.status = RuntimeStatus::Degraded;
                    warn!(
                        endpoint = %self.name(),
                        failures = health.consecutive_failures,
                        "Endpoint marked degraded: {}", reason
                    );
                } else {
                    warn!(
                        endpoint = %self.name(),
                        failures = health.consecutive_failures,
                        "Probe failed: {}", reason
                    );
                }
            }
        }
    }
}
