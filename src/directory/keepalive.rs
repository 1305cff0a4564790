//! Keep-alive loop that restores the server's directory binding after the directory was lost.

use super::service::ServiceDirectory;
use super::types::{KeepAliveOutcome, ServiceEndpoint};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct KeepAliveRunner {
    directory: Arc<dyn ServiceDirectory>,
    endpoint: ServiceEndpoint,
    directory_port: u16,
    interval: Duration,
}

impl KeepAliveRunner {
    pub fn new(
        directory: Arc<dyn ServiceDirectory>,
        endpoint: ServiceEndpoint,
        directory_port: u16,
        interval: Duration,
    ) -> Self {
        Self {
            directory,
            endpoint,
            directory_port,
            interval,
        }
    }

    /// Checks at a fixed rate, starting immediately, until the handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tracing::info!(
            "Starting keep-alive for [{}] every {:?}",
            self.endpoint.service_name,
            self.interval
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                self.check().await;
            }
        })
    }

    /// One check: look the service up, and recreate the directory and rebind if that fails.
    pub async fn check(&self) -> KeepAliveOutcome {
        let name = &self.endpoint.service_name;

        match self.directory.lookup(name).await {
            Ok(found) => {
                tracing::debug!("Directory is alive and [{}] is bound to {}", name, found.url);
                return KeepAliveOutcome::Alive;
            }
            Err(e) => {
                tracing::warn!(
                    "Problem finding [{}] in the directory, recreating it on port {}: {}",
                    name,
                    self.directory_port,
                    e
                );
            }
        }

        if let Err(e) = self.directory.create(self.directory_port).await {
            tracing::error!("Problem creating directory on port {}: {}", self.directory_port, e);
            return KeepAliveOutcome::Failed;
        }

        match self.directory.rebind(name, &self.endpoint).await {
            Ok(()) => {
                tracing::info!("Successfully rebound [{}] to {}", name, self.endpoint.url);
                KeepAliveOutcome::Restored
            }
            Err(e) => {
                tracing::error!("Problem rebinding [{}]: {}", name, e);
                KeepAliveOutcome::Failed
            }
        }
    }
}
