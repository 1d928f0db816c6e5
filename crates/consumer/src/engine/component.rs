//! Component lifecycle contract

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::ConsumerError;

/// A long-running unit a host process starts and stops
///
/// `start` runs until `cancel` fires, `stop` is called, or the component
/// fails. An `Err` from `start` is final; the host decides whether to exit
/// or alert.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, cancel: CancellationToken) -> Result<(), ConsumerError>;

    /// Request a graceful shutdown
    fn stop(&self);
}
