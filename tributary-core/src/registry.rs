use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::coerce;
use crate::error::{Error, Result};
use crate::path::{Path, SEPARATOR};
use crate::priority::ProviderId;
use crate::slot::{MapSlot, Slot};
use crate::value::Value;

pub type SlotMut<'a> = &'a mut dyn Slot;

/// Resolves a field of the destination `D` to its slot.
pub type Accessor<D> = Arc<dyn for<'a> Fn(&'a mut D) -> SlotMut<'a> + Send + Sync>;

pub(crate) type Projection<D, P> = Arc<dyn for<'a> Fn(&'a mut D) -> &'a mut P + Send + Sync>;

fn projection<D, P, F>(f: F) -> Projection<D, P>
where
    F: for<'a> Fn(&'a mut D) -> &'a mut P + Send + Sync + 'static,
{
    Arc::new(f)
}

fn accessor<D, F>(f: F) -> Accessor<D>
where
    F: for<'a> Fn(&'a mut D) -> SlotMut<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn identity<D: 'static>() -> Projection<D, D> {
    projection(|dest| dest)
}

pub(crate) fn compose<D, P, R>(outer: Projection<D, P>, inner: fn(&mut P) -> &mut R) -> Projection<D, R>
where
    D: 'static,
    P: 'static,
    R: 'static,
{
    projection(move |dest| inner(outer(dest)))
}

pub(crate) fn leaf<D, P, T>(outer: Projection<D, P>, inner: fn(&mut P) -> &mut T) -> Accessor<D>
where
    D: 'static,
    P: 'static,
    T: Slot,
{
    accessor(move |dest| {
        let slot: SlotMut<'_> = inner(outer(dest));
        slot
    })
}

pub enum FieldSlot<D> {
    Leaf(Accessor<D>),
    /// An entry of a map field discovered while fetching. `through` lists the
    /// keys of intermediate nested maps; `key` is the entry index.
    MapEntry {
        map: Accessor<D>,
        through: Vec<String>,
        key: String,
    },
}

impl<D> Clone for FieldSlot<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Leaf(access) => Self::Leaf(Arc::clone(access)),
            Self::MapEntry { map, through, key } => Self::MapEntry {
                map: Arc::clone(map),
                through: through.clone(),
                key: key.clone(),
            },
        }
    }
}

pub struct Field<D> {
    path: Path,
    slot: FieldSlot<D>,
    provider: Option<ProviderId>,
}

impl<D> Field<D> {
    pub fn new(path: Path, slot: FieldSlot<D>) -> Self {
        Self {
            path,
            slot,
            provider: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slot(&self) -> &FieldSlot<D> {
        &self.slot
    }

    pub fn provider(&self) -> Option<ProviderId> {
        self.provider
    }

    pub fn is_map_entry(&self) -> bool {
        matches!(self.slot, FieldSlot::MapEntry { .. })
    }

    /// Whether the field is a declared map that entries can be materialized into.
    pub fn is_map(&self, dest: &mut D) -> bool {
        match &self.slot {
            FieldSlot::Leaf(access) => access(dest).kind().is_map(),
            FieldSlot::MapEntry { .. } => false,
        }
    }

    pub fn value(&self, dest: &mut D) -> Value {
        match &self.slot {
            FieldSlot::Leaf(access) => access(dest).value(),
            FieldSlot::MapEntry { map, through, key } => entry_map(map, through, dest)
                .and_then(|target| target.entry_value(key))
                .unwrap_or(Value::Null),
        }
    }

    pub fn holds(&self, dest: &mut D, value: &Value) -> bool {
        match &self.slot {
            FieldSlot::Leaf(access) => access(dest).holds(value),
            FieldSlot::MapEntry { map, through, key } => entry_map(map, through, dest)
                .is_some_and(|target| target.entry_holds(key, value)),
        }
    }

    pub fn set(&mut self, dest: &mut D, value: &Value, provider: ProviderId) -> Result<()> {
        let outcome = match &self.slot {
            FieldSlot::Leaf(access) => coerce::assign(access(dest), value),
            FieldSlot::MapEntry { map, through, key } => {
                let target = entry_map(map, through, dest)
                    .ok_or_else(|| Error::ExpectedMap(self.path.clone()))?;
                target.assign_entry(key, value)
            }
        };

        outcome.map_err(|source| Error::Set {
            path: self.path.clone(),
            source,
        })?;
        self.provider = Some(provider);
        Ok(())
    }
}

impl<D> fmt::Debug for Field<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("path", &self.path)
            .field("map_entry", &self.is_map_entry())
            .field("provider", &self.provider)
            .finish()
    }
}

fn entry_map<'a, D>(
    map: &Accessor<D>,
    through: &[String],
    dest: &'a mut D,
) -> Option<&'a mut dyn MapSlot> {
    let mut target = map(dest).as_map_mut()?;
    for key in through {
        target = target.entry_map(key)?;
    }
    Some(target)
}

pub struct FieldRegistry<D> {
    fields: HashMap<String, Field<D>>,
}

impl<D> fmt::Debug for FieldRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}

impl<D> Default for FieldRegistry<D> {
    fn default() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }
}

impl<D> FieldRegistry<D> {
    pub fn set(&mut self, field: Field<D>) -> Option<Field<D>> {
        self.fields.insert(field.path.key(), field)
    }

    /// The field at `path` or at its closest registered ancestor.
    pub fn get(&self, path: &Path) -> Option<&Field<D>> {
        let key = self.resolve(path)?;
        self.fields.get(&key)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Field<D>> {
        let key = self.resolve(path)?;
        self.fields.get_mut(&key)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.fields.contains_key(&path.key())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn paths(&self) -> Vec<Path> {
        let mut paths = self
            .fields
            .values()
            .map(|field| field.path.clone())
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }

    fn resolve(&self, path: &Path) -> Option<String> {
        let mut segments = path.segments();
        while !segments.is_empty() {
            let key = segments.join(SEPARATOR);
            if self.fields.contains_key(&key) {
                return Some(key);
            }
            segments = &segments[..segments.len() - 1];
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Dest {
        name: String,
        port: u16,
    }

    fn registry() -> FieldRegistry<Dest> {
        let mut registry = FieldRegistry::default();
        registry.set(Field::new(
            Path::from(["a", "b"]),
            FieldSlot::Leaf(leaf(identity(), |dest: &mut Dest| &mut dest.name)),
        ));
        registry.set(Field::new(
            Path::from(["port"]),
            FieldSlot::Leaf(leaf(identity(), |dest: &mut Dest| &mut dest.port)),
        ));
        registry
    }

    #[test]
    fn resolves_closest_ancestor() {
        let registry = registry();
        let field = registry
            .get(&Path::from(["a", "b", "c"]))
            .expect("ancestor a.b is registered");
        assert_eq!(field.path(), &Path::from(["a", "b"]));

        assert!(registry.get(&Path::from(["a"])).is_none());
        assert!(registry.get(&Path::root()).is_none());
        assert!(registry.get(&Path::from(["x", "y"])).is_none());
    }

    #[test]
    fn set_replaces_existing_field() {
        let mut registry = registry();
        let replaced = registry.set(Field::new(
            Path::from(["port"]),
            FieldSlot::Leaf(leaf(identity(), |dest: &mut Dest| &mut dest.name)),
        ));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn set_records_owner_only_on_success() {
        let mut registry = registry();
        let mut dest = Dest::default();
        let path = Path::from(["port"]);
        let field = registry.get_mut(&path).expect("port is registered");
        let owner = crate::priority::PriorityTable::default().add(std::sync::Arc::new(
            crate::providers::MemoryProvider::default(),
        ));

        assert!(field.set(&mut dest, &Value::from("not a port"), owner).is_err());
        assert_eq!(field.provider(), None);
        assert_eq!(dest.port, 0);

        field
            .set(&mut dest, &Value::from(8080_u16), owner)
            .expect("port fits");
        assert_eq!(field.provider(), Some(owner));
        assert_eq!(dest.port, 8080);
        assert!(field.holds(&mut dest, &Value::from("8080")));
    }
}
