use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::path::Path;
use crate::value::Value;

/// Receives the values a provider produces during one fetch round.
#[async_trait]
pub trait Sink: Send {
    /// Returns [`crate::Error::Cancelled`] once the round has been cancelled;
    /// providers should stop and propagate the first error they get.
    async fn write(&mut self, path: Path, value: Value) -> Result<()>;
}

/// A source of configuration values.
///
/// `values` may be called many times over the provider's lifetime, once per
/// fetch round. The optional capabilities default to "not supported".
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn values(&self, cancel: &CancellationToken, sink: &mut dyn Sink) -> Result<()>;

    /// A channel signalled whenever the provider's values change, or `None` if
    /// the provider cannot notify. The channel must close once `close` is
    /// called.
    fn changes(&self) -> Result<Option<mpsc::Receiver<()>>> {
        Ok(None)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
