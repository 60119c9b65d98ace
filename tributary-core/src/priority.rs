use std::fmt;
use std::sync::Arc;

use crate::provider::Provider;

/// Handle issued to a provider when it is first added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(u32);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider#{}", self.0)
    }
}

#[derive(Clone)]
pub(crate) struct Registered {
    pub id: ProviderId,
    pub rank: u32,
    pub provider: Arc<dyn Provider>,
}

/// Ranks providers in the order they were first added; rank 0 means unknown.
#[derive(Default)]
pub struct PriorityTable {
    entries: Vec<Registered>,
}

impl PriorityTable {
    /// Adds `provider` unless the same instance is already known.
    pub fn add(&mut self, provider: Arc<dyn Provider>) -> ProviderId {
        if let Some(id) = self.find(&provider) {
            return id;
        }

        let rank = self.entries.len() as u32 + 1;
        let id = ProviderId(rank);
        tracing::debug!(provider = provider.name(), rank, "registered provider");
        self.entries.push(Registered { id, rank, provider });
        id
    }

    pub fn find(&self, provider: &Arc<dyn Provider>) -> Option<ProviderId> {
        self.entries
            .iter()
            .find(|entry| same_instance(&entry.provider, provider))
            .map(|entry| entry.id)
    }

    pub fn priority(&self, id: ProviderId) -> u32 {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map_or(0, |entry| entry.rank)
    }

    /// Whether a write by `writer` must yield to the field's current `owner`.
    pub fn overridden(&self, owner: Option<ProviderId>, writer: ProviderId) -> bool {
        owner.is_some_and(|owner| self.priority(owner) > self.priority(writer))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self, id: ProviderId) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.provider.name())
    }

    /// Registered providers in ascending rank.
    pub(crate) fn entries(&self) -> &[Registered] {
        &self.entries
    }
}

fn same_instance(left: &Arc<dyn Provider>, right: &Arc<dyn Provider>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}
