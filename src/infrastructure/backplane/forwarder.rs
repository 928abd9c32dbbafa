//! Ordered outbound queue to the backplane.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Backplane, BackplaneEnvelope};
use crate::infrastructure::metrics;

/// Hands envelopes to a single publishing task, so envelopes leave this
/// instance in emission order.
#[derive(Clone)]
pub struct BackplaneForwarder {
    tx: mpsc::UnboundedSender<String>,
}

impl BackplaneForwarder {
    pub fn spawn(backplane: Arc<dyn Backplane>, channel: String) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let handle = tokio::spawn(async move {
            let mut failing = false;
            while let Some(payload) = rx.recv().await {
                match backplane.publish(&channel, payload).await {
                    Ok(()) => {
                        if failing {
                            tracing::info!(channel = %channel, "Backplane publish recovered");
                            failing = false;
                        }
                    }
                    Err(e) => {
                        metrics::record_backplane_publish_failure();
                        if !failing {
                            tracing::warn!(
                                channel = %channel,
                                error = %e,
                                "Backplane publish failed; remote instances will miss events until it recovers"
                            );
                            failing = true;
                        }
                    }
                }
            }
            tracing::debug!("Backplane forwarder stopped");
        });

        (Self { tx }, handle)
    }

    pub fn forward(&self, envelope: &BackplaneEnvelope) {
        match envelope.encode() {
            Ok(payload) => {
                if self.tx.send(payload).is_err() {
                    tracing::debug!("Backplane forwarder closed, dropping envelope");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode backplane envelope"),
        }
    }
}
