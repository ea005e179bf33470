//! Periodic health checks and alert delivery.
//!
//! Rules and cooldowns live in `shipcycle_core::monitor`; this module loads
//! the state they need, logs every admitted alert and forwards it to an
//! optional sink. Delivery failures are logged and otherwise ignored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use shipcycle_core::config::MonitorConfig;
use shipcycle_core::monitor::{self, Alert};

use crate::store::{StateStore, StoreError};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    key: &'a str,
    message: &'a str,
    raised_at: DateTime<Utc>,
    text: String,
}

/// POSTs each alert as JSON.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let payload = WebhookPayload {
            key: alert.kind.key(),
            message: &alert.message,
            raised_at: alert.raised_at,
            text: format!("[shipcycle] {}: {}", alert.kind, alert.message),
        };
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct HealthMonitor {
    store: StateStore,
    config: MonitorConfig,
    sink: Option<Arc<dyn AlertSink>>,
}

impl HealthMonitor {
    pub fn new(store: StateStore, config: MonitorConfig, sink: Option<Arc<dyn AlertSink>>) -> Self {
        Self {
            store,
            config,
            sink,
        }
    }

    /// Evaluate every rule once and deliver what survives the cooldowns.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Alert>, StoreError> {
        let state = self.store.agent_state().await?;
        let queue = self.store.queue().await?;
        let raised = monitor::evaluate(&state, &queue, &self.config, now);
        if raised.is_empty() {
            return Ok(raised);
        }

        let cooldown = self.config.cooldown();
        let fired = self
            .store
            .update_alert_state(move |alerts| monitor::admit(raised, alerts, cooldown, now))
            .await?;

        for alert in &fired {
            tracing::warn!(alert = %alert.kind, message = %alert.message, "health alert");
            if let Some(sink) = &self.sink
                && let Err(e) = sink.deliver(alert).await
            {
                tracing::warn!(alert = %alert.kind, error = %e, "alert delivery failed");
            }
        }
        Ok(fired)
    }

    /// Tick forever on the configured interval.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick(Utc::now()).await {
                tracing::error!(error = %e, "health check failed");
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
