use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::{FieldUpdate, Notification, NotificationBus};
use crate::materialize::materialize;
use crate::options::Options;
use crate::path::Path;
use crate::priority::{PriorityTable, ProviderId, Registered};
use crate::provider::{Provider, Sink};
use crate::record::{hydrate, Record};
use crate::registry::FieldRegistry;
use crate::value::Value;

/// Aggregates values from any number of providers into a destination record.
///
/// Cloning is cheap; clones share the destination, the providers and the
/// subscribers.
pub struct Aggregator<D> {
    inner: Arc<Inner<D>>,
}

impl<D> Clone for Aggregator<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<D> {
    options: Options,
    state: RwLock<State<D>>,
    // Serializes fetch rounds against the shared registry.
    round: Mutex<()>,
    bus: NotificationBus,
    watchers: Mutex<Watchers>,
    shutdown: CancellationToken,
}

struct State<D> {
    dest: D,
    fields: FieldRegistry<D>,
    priorities: PriorityTable,
}

#[derive(Default)]
struct Watchers {
    watching: HashSet<ProviderId>,
    handles: Vec<JoinHandle<()>>,
}

impl<D: Record> Aggregator<D> {
    /// Registers every tagged field of `dest`. Fails without side effects if
    /// the record is malformed.
    pub fn new(dest: D, options: Options) -> Result<Self> {
        let fields = hydrate::<D>(&options)?;
        let bus = NotificationBus::new(options.subscriber_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                state: RwLock::new(State {
                    dest,
                    fields,
                    priorities: PriorityTable::default(),
                }),
                round: Mutex::new(()),
                bus,
                watchers: Mutex::new(Watchers::default()),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub async fn add(&self, provider: Arc<dyn Provider>) -> ProviderId {
        self.inner.state.write().await.priorities.add(provider)
    }

    /// Rank of `id`; later additions rank higher. Unknown handles rank 0.
    pub async fn priority(&self, id: ProviderId) -> u32 {
        self.inner.state.read().await.priorities.priority(id)
    }

    pub async fn fetch(&self, providers: &[Arc<dyn Provider>]) -> Result<()> {
        self.fetch_with_cancel(&CancellationToken::new(), providers)
            .await
    }

    /// Adds `providers` then runs one round for every known provider, lowest
    /// rank first. Stops at the first failed round; writes already applied
    /// are kept.
    pub async fn fetch_with_cancel(
        &self,
        cancel: &CancellationToken,
        providers: &[Arc<dyn Provider>],
    ) -> Result<()> {
        let entries = self.register(providers).await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if self.inner.options.auto_watch {
            self.watch_with_cancel(cancel, &[]).await?;
        }

        for entry in entries {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.inner.round(&entry, cancel).await?;
        }

        Ok(())
    }

    pub async fn watch(&self, providers: &[Arc<dyn Provider>]) -> Result<()> {
        self.watch_with_cancel(&CancellationToken::new(), providers)
            .await
    }

    /// Starts one worker per known provider that can signal changes. Each
    /// provider is watched at most once over the aggregator's lifetime.
    pub async fn watch_with_cancel(
        &self,
        cancel: &CancellationToken,
        providers: &[Arc<dyn Provider>],
    ) -> Result<()> {
        let entries = self.register(providers).await;
        let mut watchers = self.inner.watchers.lock().await;

        for entry in entries {
            if watchers.watching.contains(&entry.id) {
                continue;
            }

            let changes = entry.provider.changes().map_err(|err| Error::Notify {
                provider: entry.provider.name().to_owned(),
                reason: err.to_string(),
            })?;
            let Some(changes) = changes else {
                continue;
            };

            tracing::info!(provider = entry.provider.name(), id = %entry.id, "watching provider");
            watchers.watching.insert(entry.id);
            let inner = Arc::clone(&self.inner);
            let cancel = cancel.clone();
            watchers.handles.push(tokio::spawn(async move {
                inner.watch_provider(entry, changes, cancel).await;
            }));
        }

        Ok(())
    }

    /// Opens a channel receiving one notification per fetch round until
    /// [`Aggregator::shutdown`]; after shutdown the channel is already closed.
    ///
    /// Rounds wait for room in every subscriber channel before the next round
    /// can start. A receiver that stops draining stalls fetches and watch
    /// workers, so do not await [`Aggregator::fetch`] from a receive loop
    /// that may fall `subscriber_capacity` notifications behind.
    pub async fn subscribe(&self) -> mpsc::Receiver<Notification> {
        self.inner.bus.subscribe().await
    }

    /// Shared access to the destination. Fetch rounds wait until the guard is
    /// dropped.
    pub async fn read(&self) -> RwLockReadGuard<'_, D> {
        RwLockReadGuard::map(self.inner.state.read().await, |state| &state.dest)
    }

    pub async fn snapshot(&self) -> D
    where
        D: Clone,
    {
        self.read().await.clone()
    }

    pub async fn value(&self, path: &Path) -> Option<Value> {
        let mut state = self.inner.state.write().await;
        let State { dest, fields, .. } = &mut *state;
        fields.get(path).map(|field| field.value(dest))
    }

    pub async fn owner(&self, path: &Path) -> Option<ProviderId> {
        let state = self.inner.state.read().await;
        state.fields.get(path).and_then(|field| field.provider())
    }

    pub async fn paths(&self) -> Vec<Path> {
        self.inner.state.read().await.fields.paths()
    }

    /// Closes every provider, waits for the watch workers to stop, then closes
    /// every subscriber channel. Returns the first provider close error.
    pub async fn shutdown(&self) -> Result<()> {
        let providers = {
            let state = self.inner.state.read().await;
            state
                .priorities
                .entries()
                .iter()
                .map(|entry| Arc::clone(&entry.provider))
                .collect::<Vec<_>>()
        };

        let mut first_error = None;
        for provider in providers {
            if let Err(err) = provider.close().await {
                tracing::warn!(%err, provider = provider.name(), "failed to close provider");
                first_error.get_or_insert(err);
            }
        }

        self.inner.shutdown.cancel();
        let handles = std::mem::take(&mut self.inner.watchers.lock().await.handles);
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "watch worker terminated abnormally");
            }
        }

        self.inner.bus.close().await;
        first_error.map_or(Ok(()), Err)
    }

    async fn register(&self, providers: &[Arc<dyn Provider>]) -> Vec<Registered> {
        let mut state = self.inner.state.write().await;
        for provider in providers {
            state.priorities.add(Arc::clone(provider));
        }
        state.priorities.entries().to_vec()
    }
}

impl<D: Record> Inner<D> {
    async fn round(&self, entry: &Registered, cancel: &CancellationToken) -> Result<()> {
        let _round = self.round.lock().await;
        let name = entry.provider.name();

        let mut sink = RoundSink {
            inner: self,
            provider: entry.id,
            cancel,
            updates: Vec::new(),
        };
        let outcome = AssertUnwindSafe(entry.provider.values(cancel, &mut sink))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(Error::from_panic(payload)));

        let notification = match &outcome {
            Ok(()) => {
                tracing::info!(provider = name, updates = sink.updates.len(), "fetch round complete");
                Notification::Updates(sink.updates)
            }
            Err(err) => {
                tracing::debug!(%err, provider = name, "fetch round failed");
                Notification::Failed(err.clone())
            }
        };
        self.bus.publish(notification).await;

        outcome
    }

    async fn watch_provider(
        &self,
        entry: Registered,
        mut changes: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) {
        let name = entry.provider.name().to_owned();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                signal = changes.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    if !self.options.auto_update {
                        tracing::debug!(provider = %name, "change ignored, auto update disabled");
                        continue;
                    }
                    if let Err(err) = self.round(&entry, &cancel).await {
                        tracing::warn!(%err, provider = %name, "watched fetch round failed");
                    }
                }
            }
        }

        tracing::info!(provider = %name, "stopped watching provider");
    }
}

impl<D> State<D> {
    fn apply(
        &mut self,
        options: &Options,
        provider: ProviderId,
        path: &Path,
        value: &Value,
    ) -> Result<Option<FieldUpdate>> {
        let Self {
            dest,
            fields,
            priorities,
        } = self;

        let Some(found) = fields.get(path) else {
            if options.error_on_field_not_found {
                return Err(Error::FieldNotFound(path.clone()));
            }
            tracing::debug!(%path, "no field for path, ignoring value");
            return Ok(None);
        };

        if found.path() != path && found.is_map(dest) {
            let entry = materialize(dest, found, path)?;
            fields.set(entry);
        }

        let field = fields
            .get_mut(path)
            .ok_or_else(|| Error::FieldNotFound(path.clone()))?;

        if field.holds(dest, value) {
            tracing::debug!(%path, "value unchanged");
            return Ok(None);
        }

        if options.enforce_priority && priorities.overridden(field.provider(), provider) {
            tracing::debug!(%path, %provider, "value dropped, field owned by a higher priority provider");
            return Ok(None);
        }

        let old = field.value(dest);
        field.set(dest, value, provider)?;

        Ok(Some(FieldUpdate {
            path: field.path().clone(),
            old,
            new: field.value(dest),
            provider,
        }))
    }
}

struct RoundSink<'r, D> {
    inner: &'r Inner<D>,
    provider: ProviderId,
    cancel: &'r CancellationToken,
    updates: Vec<FieldUpdate>,
}

#[async_trait]
impl<D: Record> Sink for RoundSink<'_, D> {
    async fn write(&mut self, path: Path, value: Value) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut state = self.inner.state.write().await;
        if let Some(update) = state.apply(&self.inner.options, self.provider, &path, &value)? {
            self.updates.push(update);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::error::{CoerceError, NonErrorPanic};
    use crate::providers::MemoryProvider;
    use crate::record::Walker;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Limits {
        burst: i32,
    }

    impl Record for Limits {
        fn fields<D: 'static>(walker: &mut Walker<'_, D, Self>) -> Result<()> {
            walker.leaf("burst", &[("fido", "burst")], |limits| &mut limits.burst)
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Service {
        name: String,
        port: u16,
        labels: HashMap<String, String>,
        routes: HashMap<String, HashMap<String, String>>,
        limits: Limits,
    }

    impl Record for Service {
        fn fields<D: 'static>(walker: &mut Walker<'_, D, Self>) -> Result<()> {
            walker.leaf("name", &[("fido", "name")], |service| &mut service.name)?;
            walker.leaf("port", &[("fido", "port")], |service| &mut service.port)?;
            walker.leaf("labels", &[("fido", "labels")], |service| &mut service.labels)?;
            walker.leaf("routes", &[("fido", "routes")], |service| &mut service.routes)?;
            walker.record("limits", &[("fido", "limits")], |service| &mut service.limits)
        }
    }

    struct Scripted {
        pairs: Vec<(Path, Value)>,
        fault: Option<fn()>,
    }

    impl Scripted {
        fn pairs<const N: usize>(pairs: [(&str, Value); N]) -> Arc<dyn Provider> {
            Arc::new(Self {
                pairs: pairs
                    .into_iter()
                    .map(|(path, value)| (path.parse().expect("valid path"), value))
                    .collect(),
                fault: None,
            })
        }

        fn faulting(fault: fn()) -> Arc<dyn Provider> {
            Arc::new(Self {
                pairs: Vec::new(),
                fault: Some(fault),
            })
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn values(&self, _cancel: &CancellationToken, sink: &mut dyn Sink) -> Result<()> {
            if let Some(fault) = self.fault {
                fault();
            }
            for (path, value) in &self.pairs {
                sink.write(path.clone(), value.clone()).await?;
            }
            Ok(())
        }
    }

    fn aggregator() -> Aggregator<Service> {
        Aggregator::new(Service::default(), Options::default()).expect("service hydrates")
    }

    fn path(raw: &str) -> Path {
        raw.parse().expect("valid path")
    }

    #[tokio::test]
    async fn unwritten_fields_keep_zero_values() {
        let aggregator = aggregator();
        aggregator
            .fetch(&[Scripted::pairs([("name", Value::from("api"))])])
            .await
            .expect("fetch succeeds");

        let service = aggregator.snapshot().await;
        assert_eq!(service.name, "api");
        assert_eq!(service.port, 0);
        assert_eq!(aggregator.value(&path("limits.burst")).await, Some(Value::Int(0)));
    }

    #[tokio::test]
    async fn providers_rank_in_first_add_order() {
        let aggregator = aggregator();
        let first = Scripted::pairs([]);
        let second = Scripted::pairs([]);

        let first_id = aggregator.add(first.clone()).await;
        let second_id = aggregator.add(second).await;
        assert_eq!(aggregator.priority(first_id).await, 1);
        assert_eq!(aggregator.priority(second_id).await, 2);
        assert_eq!(aggregator.add(first).await, first_id);
    }

    #[tokio::test]
    async fn lower_priority_cannot_overwrite_higher() {
        let options = Options::default().with_auto_watch(false);
        let aggregator = Aggregator::new(Service::default(), options).expect("hydrates");
        let low = Arc::new(MemoryProvider::default());
        let high = Arc::new(MemoryProvider::default());
        high.set(&path("port"), 2_u16).await;

        aggregator
            .fetch(&[low.clone(), high.clone()])
            .await
            .expect("first fetch");
        assert_eq!(aggregator.read().await.port, 2);

        low.set(&path("port"), 1_u16).await;
        aggregator.fetch(&[]).await.expect("second fetch");

        assert_eq!(aggregator.read().await.port, 2);
        let high_id = aggregator.add(high).await;
        assert_eq!(aggregator.owner(&path("port")).await, Some(high_id));
    }

    #[tokio::test]
    async fn priority_enforcement_can_be_disabled() {
        let options = Options::default()
            .with_priority_enforcement(false)
            .with_auto_watch(false);
        let aggregator = Aggregator::new(Service::default(), options).expect("hydrates");
        let low = Arc::new(MemoryProvider::default());
        let high = Arc::new(MemoryProvider::default());
        high.set(&path("port"), 2_u16).await;
        aggregator.fetch(&[low.clone(), high]).await.expect("first fetch");

        low.set(&path("port"), 1_u16).await;
        aggregator.fetch(&[]).await.expect("second fetch");

        // low runs first, then high restores its own value.
        assert_eq!(aggregator.read().await.port, 2);
        let mut notifications = aggregator.subscribe().await;
        aggregator.fetch(&[]).await.expect("third fetch");
        let low_round = notifications.recv().await.expect("low round");
        assert_eq!(low_round.updates().len(), 1);
    }

    #[tokio::test]
    async fn rewriting_same_value_is_a_no_op() {
        let aggregator = aggregator();
        let first = Scripted::pairs([("port", Value::from(8080))]);
        aggregator.fetch(&[first.clone()]).await.expect("first fetch");
        let owner = aggregator.owner(&path("port")).await;

        let mut notifications = aggregator.subscribe().await;
        let second = Scripted::pairs([("port", Value::from("8080"))]);
        aggregator.fetch(&[second]).await.expect("second fetch");

        for _ in 0..2 {
            let round = notifications.recv().await.expect("one notification per round");
            assert!(round.is_ok());
            assert!(round.updates().is_empty());
        }
        assert_eq!(aggregator.owner(&path("port")).await, owner);
    }

    #[tokio::test]
    async fn updates_carry_old_and_new_values() {
        let aggregator = aggregator();
        let mut notifications = aggregator.subscribe().await;
        let provider = Scripted::pairs([("port", Value::from("9000")), ("name", Value::from("api"))]);
        let id = aggregator.add(provider.clone()).await;
        aggregator.fetch(&[provider]).await.expect("fetch succeeds");

        let round = notifications.recv().await.expect("round published");
        let updates = round.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].path, path("port"));
        assert_eq!(updates[0].old, Value::UInt(0));
        assert_eq!(updates[0].new, Value::UInt(9000));
        assert_eq!(updates[0].provider, id);
        assert_eq!(updates[1].path, path("name"));
    }

    #[tokio::test]
    async fn map_entries_are_written_and_updated_in_place() {
        let aggregator = aggregator();
        aggregator
            .fetch(&[Scripted::pairs([("labels.k", Value::from("v"))])])
            .await
            .expect("first fetch");
        assert_eq!(aggregator.read().await.labels.get("k").map(String::as_str), Some("v"));

        aggregator
            .fetch(&[Scripted::pairs([("labels.k", Value::from("w"))])])
            .await
            .expect("second fetch");
        let service = aggregator.snapshot().await;
        assert_eq!(service.labels.len(), 1);
        assert_eq!(service.labels["k"], "w");
    }

    #[tokio::test]
    async fn nested_map_entries_are_allocated() {
        let aggregator = aggregator();
        aggregator
            .fetch(&[Scripted::pairs([("routes.x.y", Value::from("v"))])])
            .await
            .expect("fetch succeeds");

        let service = aggregator.snapshot().await;
        assert_eq!(service.routes["x"]["y"], "v");
        assert_eq!(service.routes.len(), 1);
    }

    #[tokio::test]
    async fn unknown_paths_are_ignored_or_rejected() {
        let aggregator = aggregator();
        aggregator
            .fetch(&[Scripted::pairs([("missing", Value::from(1))])])
            .await
            .expect("ignored by default");

        let options = Options::default().with_error_on_field_not_found(true);
        let strict = Aggregator::new(Service::default(), options).expect("hydrates");
        let err = strict
            .fetch(&[Scripted::pairs([("missing", Value::from(1))])])
            .await
            .expect_err("unknown field");
        assert!(matches!(err, Error::FieldNotFound(_)));
    }

    #[tokio::test]
    async fn panics_carrying_errors_are_wrapped() {
        let aggregator = aggregator();
        let mut notifications = aggregator.subscribe().await;
        let err = aggregator
            .fetch(&[Scripted::faulting(|| {
                std::panic::panic_any(Error::Provider("exploded".to_owned()))
            })])
            .await
            .expect_err("panic is caught");

        match &err {
            Error::Panicked(source) => assert!(source.to_string().contains("exploded")),
            other => panic!("unexpected error: {other}"),
        }
        let round = notifications.recv().await.expect("failure is published");
        assert!(matches!(round.error(), Some(Error::Panicked(_))));
    }

    #[tokio::test]
    async fn panics_carrying_other_values_are_distinguished() {
        let aggregator = aggregator();
        let err = aggregator
            .fetch(&[Scripted::faulting(|| panic!("not an error"))])
            .await
            .expect_err("panic is caught");

        match err {
            Error::NonErrorPanic(NonErrorPanic { value }) => assert_eq!(value, "not an error"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_fetch_applies_nothing() {
        let aggregator = aggregator();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = aggregator
            .fetch_with_cancel(&cancel, &[Scripted::pairs([("name", Value::from("api"))])])
            .await
            .expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(aggregator.snapshot().await, Service::default());
    }

    #[tokio::test]
    async fn cancellation_mid_round_keeps_earlier_writes() {
        struct CancelsMidway;

        #[async_trait]
        impl Provider for CancelsMidway {
            fn name(&self) -> &str {
                "cancels-midway"
            }

            async fn values(&self, cancel: &CancellationToken, sink: &mut dyn Sink) -> Result<()> {
                sink.write(path("name"), Value::from("api")).await?;
                cancel.cancel();
                sink.write(path("port"), Value::from(80)).await
            }
        }

        let aggregator = aggregator();
        let provider: Arc<dyn Provider> = Arc::new(CancelsMidway);
        let mut notifications = aggregator.subscribe().await;
        let err = aggregator
            .fetch_with_cancel(&CancellationToken::new(), &[provider])
            .await
            .expect_err("second write is refused");
        assert!(matches!(err, Error::Cancelled));

        let service = aggregator.snapshot().await;
        assert_eq!(service.name, "api");
        assert_eq!(service.port, 0);
        let round = notifications.recv().await.expect("failure is published");
        assert!(matches!(round.error(), Some(Error::Cancelled)));
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn deeper_paths_resolve_against_map_shape() {
        let aggregator = aggregator();
        aggregator
            .fetch(&[Scripted::pairs([
                ("labels.a.b", Value::from("v")),
                ("routes.x.y.z", Value::from("w")),
            ])])
            .await
            .expect("fetch succeeds");

        let service = aggregator.snapshot().await;
        assert_eq!(service.labels.len(), 1);
        assert_eq!(service.labels["b"], "v");
        assert_eq!(service.routes["x"]["z"], "w");
        assert_eq!(service.routes["x"].len(), 1);
    }

    #[tokio::test]
    async fn non_text_values_do_not_reach_text_fields() {
        let aggregator = aggregator();
        for value in [Value::Float(1.5), Value::List(vec![Value::from("a")])] {
            let err = aggregator
                .fetch(&[Scripted::pairs([("name", value)])])
                .await
                .expect_err("text field rejects value");
            assert!(matches!(
                err,
                Error::Set {
                    source: CoerceError::InvalidType { .. },
                    ..
                }
            ));
        }
        assert_eq!(aggregator.read().await.name, "");
    }

    #[tokio::test]
    async fn watched_providers_refetch_on_change() {
        let aggregator = aggregator();
        let provider = Arc::new(MemoryProvider::default());
        provider.set(&path("port"), 80_u16).await;
        aggregator.fetch(&[provider.clone()]).await.expect("fetch succeeds");

        let mut notifications = aggregator.subscribe().await;
        provider.set(&path("port"), 8080_u16).await;

        let round = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .expect("worker refetches")
            .expect("bus open");
        assert_eq!(round.updates().len(), 1);
        assert_eq!(round.updates()[0].new, Value::UInt(8080));
        assert_eq!(aggregator.read().await.port, 8080);

        aggregator.shutdown().await.expect("clean shutdown");
        assert!(notifications.recv().await.is_none());
    }

    #[tokio::test]
    async fn watch_worker_survives_failed_rounds() {
        let aggregator = aggregator();
        let provider = Arc::new(MemoryProvider::default());
        provider.set(&path("port"), 1_u16).await;
        aggregator.fetch(&[provider.clone()]).await.expect("fetch succeeds");
        let mut notifications = aggregator.subscribe().await;

        provider.set(&path("port"), "nope").await;
        let round = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .expect("worker refetches")
            .expect("bus open");
        assert!(matches!(round.error(), Some(Error::Set { .. })));
        assert_eq!(aggregator.read().await.port, 1);

        provider.set(&path("port"), 7_u16).await;
        let round = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .expect("worker still running")
            .expect("bus open");
        assert_eq!(round.updates().len(), 1);
        assert_eq!(round.updates()[0].old, Value::UInt(1));
        assert_eq!(round.updates()[0].new, Value::UInt(7));

        aggregator.shutdown().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn changes_are_ignored_without_auto_update() {
        let options = Options::default().with_auto_update(false);
        let aggregator = Aggregator::new(Service::default(), options).expect("hydrates");
        let provider = Arc::new(MemoryProvider::default());
        provider.set(&path("port"), 1_u16).await;
        aggregator.fetch(&[provider.clone()]).await.expect("fetch succeeds");
        let mut notifications = aggregator.subscribe().await;

        provider.set(&path("port"), 2_u16).await;
        let waited = tokio::time::timeout(Duration::from_millis(200), notifications.recv()).await;
        assert!(waited.is_err());
        assert_eq!(aggregator.read().await.port, 1);

        aggregator.shutdown().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn subscribing_after_shutdown_ends_immediately() {
        let aggregator = aggregator();
        aggregator.shutdown().await.expect("clean shutdown");

        let mut late = aggregator.subscribe().await;
        let next = tokio::time::timeout(Duration::from_secs(5), late.recv())
            .await
            .expect("stream is already closed");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn watching_is_started_once_per_provider() {
        let options = Options::default().with_auto_watch(false);
        let aggregator = Aggregator::new(Service::default(), options).expect("hydrates");
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::default());

        aggregator.watch(&[provider.clone()]).await.expect("first watch");
        aggregator.watch(&[provider]).await.expect("second watch is a no-op");
        assert_eq!(aggregator.inner.watchers.lock().await.handles.len(), 1);

        aggregator.shutdown().await.expect("clean shutdown");
        assert!(aggregator.inner.watchers.lock().await.handles.is_empty());
    }
}
