//! Alert delivery.
//!
//! The scheduler reports state transitions through [`NotificationGateway`].
//! [`ChannelGateway`] renders each event as an [`Alert`] and hands it to
//! every configured [`NotificationChannel`]. A failing channel never
//! stops the others.

mod alert;
mod channels;

pub use alert::*;
pub use channels::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::Target;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("delivery via {channel} failed: {message}")]
    Delivery { channel: String, message: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{} of the channels failed: {}", .0.len(), .0.join("; "))]
    Partial(Vec<String>),
}

/// Receives alert and recovery events from the scheduler.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify_down(
        &self,
        target: &Target,
        status_code: Option<u16>,
        response_time_ms: Option<f64>,
    ) -> Result<(), NotifyError>;

    async fn notify_recovered(
        &self,
        target: &Target,
        downtime_seconds: i64,
    ) -> Result<(), NotifyError>;

    async fn notify_ssl_expiring(
        &self,
        target: &Target,
        days_remaining: i64,
    ) -> Result<(), NotifyError>;
}

/// One way of getting an alert to a human.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Fans every alert out to all channels.
#[derive(Default)]
pub struct ChannelGateway {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl ChannelGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: impl NotificationChannel + 'static) -> Self {
        tracing::info!("Notify: registered channel {}", channel.name());
        self.channels.push(Box::new(channel));
        self
    }

    /// Deliver to every channel. Failures are logged and collected into
    /// [`NotifyError::Partial`] after all channels have been tried.
    pub async fn broadcast(&self, alert: &Alert) -> Result<(), NotifyError> {
        let mut failures = Vec::new();

        for channel in &self.channels {
            match channel.deliver(alert).await {
                Ok(()) => {
                    tracing::debug!("Notify: sent via {}: {}", channel.name(), alert.subject())
                }
                Err(e) => {
                    tracing::error!("Notify: error via {}: {}", channel.name(), e);
                    failures.push(format!("{}: {}", channel.name(), e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Partial(failures))
        }
    }
}

#[async_trait]
impl NotificationGateway for ChannelGateway {
    async fn notify_down(
        &self,
        target: &Target,
        status_code: Option<u16>,
        response_time_ms: Option<f64>,
    ) -> Result<(), NotifyError> {
        let kind = AlertKind::Down {
            status_code,
            response_time_ms,
        };
        self.broadcast(&Alert::new(target, kind)).await
    }

    async fn notify_recovered(
        &self,
        target: &Target,
        downtime_seconds: i64,
    ) -> Result<(), NotifyError> {
        self.broadcast(&Alert::new(target, AlertKind::Recovered { downtime_seconds }))
            .await
    }

    async fn notify_ssl_expiring(
        &self,
        target: &Target,
        days_remaining: i64,
    ) -> Result<(), NotifyError> {
        self.broadcast(&Alert::new(target, AlertKind::SslExpiring { days_remaining }))
            .await
    }
}
