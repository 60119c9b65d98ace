use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::path::Path;
use crate::provider::{Provider, Sink};
use crate::providers::walk_map;
use crate::value::Value;

pub const PROVIDER_NAME: &str = "inmemory";

/// Serves a tree of values held in memory. Runtime changes made with
/// [`MemoryProvider::set`] are signalled to watchers.
pub struct MemoryProvider {
    name: String,
    values: RwLock<BTreeMap<String, Value>>,
    changes: Mutex<Option<mpsc::Sender<()>>>,
}

impl MemoryProvider {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self::named(PROVIDER_NAME, values)
    }

    pub fn named(name: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(values),
            changes: Mutex::new(None),
        }
    }

    /// Stores `value` at `path`, replacing any non-map value met on the way.
    pub async fn set(&self, path: &Path, value: impl Into<Value>) {
        let Some((last, parents)) = path.segments().split_last() else {
            tracing::debug!(provider = %self.name, "ignoring write to the root path");
            return;
        };

        {
            let mut values = self.values.write().await;
            let mut target = &mut *values;
            for segment in parents {
                let entry = target
                    .entry(segment.clone())
                    .or_insert_with(|| Value::Map(BTreeMap::new()));
                if !matches!(entry, Value::Map(_)) {
                    *entry = Value::Map(BTreeMap::new());
                }
                let Value::Map(nested) = entry else {
                    return;
                };
                target = nested;
            }
            target.insert(last.clone(), value.into());
        }

        self.signal();
    }

    /// Replaces every value at once.
    pub async fn replace(&self, values: BTreeMap<String, Value>) {
        *self.values.write().await = values;
        self.signal();
    }

    fn signal(&self) {
        let changes = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = changes.as_ref() {
            // A full channel already has a refetch pending.
            let _ = sender.try_send(());
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn values(&self, cancel: &CancellationToken, sink: &mut dyn Sink) -> Result<()> {
        let values = self.values.read().await.clone();
        walk_map(cancel, &values, sink).await
    }

    fn changes(&self) -> Result<Option<mpsc::Receiver<()>>> {
        let (sender, receiver) = mpsc::channel(1);
        *self.changes.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        Ok(Some(receiver))
    }

    async fn close(&self) -> Result<()> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::tests::Collect;

    #[tokio::test]
    async fn set_builds_nested_maps() {
        let provider = MemoryProvider::default();
        provider.set(&Path::from(["server", "port"]), 8080).await;
        provider.set(&Path::from(["name"]), "api").await;

        let mut sink = Collect::default();
        provider
            .values(&CancellationToken::new(), &mut sink)
            .await
            .expect("values succeed");
        assert_eq!(
            sink.pairs,
            vec![
                ("name".to_owned(), Value::from("api")),
                ("server.port".to_owned(), Value::from(8080)),
            ]
        );
    }

    #[tokio::test]
    async fn signals_changes_until_closed() {
        let provider = MemoryProvider::default();
        provider.set(&Path::from(["before"]), 1).await;

        let mut changes = provider
            .changes()
            .expect("notify starts")
            .expect("memory provider notifies");
        provider.set(&Path::from(["after"]), 2).await;
        provider.set(&Path::from(["again"]), 3).await;
        assert_eq!(changes.recv().await, Some(()));

        provider.close().await.expect("close succeeds");
        assert_eq!(changes.recv().await, None);
    }
}
