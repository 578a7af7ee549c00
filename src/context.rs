//! The collaborators a monitor needs, built once at startup.

use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::db::{Store, TargetRegistry};
use crate::notify::NotificationGateway;
use crate::probe::{Prober, RetryPolicy, Transport};
use crate::scheduler::IncidentTracker;

pub struct MonitorContext {
    pub config: MonitorConfig,
    pub targets: Arc<dyn TargetRegistry>,
    pub store: Arc<dyn Store>,
    pub prober: Prober,
    pub incidents: IncidentTracker,
    pub notifier: Arc<dyn NotificationGateway>,
}

impl MonitorContext {
    /// Build the prober and incident tracker from `config` and the
    /// given collaborators.
    pub fn new(
        config: MonitorConfig,
        targets: Arc<dyn TargetRegistry>,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Self {
        let retry = RetryPolicy {
            attempts: config.retry_attempts,
            ..RetryPolicy::default()
        };
        let prober = Prober::new(transport, retry, config.connection_timeout);
        let incidents = IncidentTracker::new(store.clone());

        Self {
            config,
            targets,
            store,
            prober,
            incidents,
            notifier,
        }
    }
}
