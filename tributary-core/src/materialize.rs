//! Lazy registration of map entries.
//!
//! Providers may address entries of a map field (`labels.env`, or
//! `routes.api.timeout` for a map of maps) that do not exist when the
//! destination is hydrated. The first write to such a path turns the map's
//! registry entry into a dedicated map-entry field at the requested path.

use crate::error::{Error, Result};
use crate::path::Path;
use crate::registry::{Field, FieldSlot};
use crate::slot::{Kind, MapSlot};

/// Builds the map-entry field for `path`, a strict descendant of `ancestor`.
///
/// Intermediate nested maps are allocated; the entry itself is only written
/// once a value has been coerced into a fresh element.
pub(crate) fn materialize<D>(dest: &mut D, ancestor: &Field<D>, path: &Path) -> Result<Field<D>> {
    let at = ancestor.path().clone();
    let FieldSlot::Leaf(access) = ancestor.slot() else {
        return Err(Error::ExpectedMap(at));
    };
    let remaining = path
        .strip_prefix(&at)
        .filter(|remaining| !remaining.is_empty())
        .ok_or_else(|| Error::InvalidPath {
            path: path.clone(),
            reason: format!("'{at}' is not an ancestor"),
        })?;

    let slot = access(dest);
    let Kind::Map { text_keys, .. } = slot.kind() else {
        return Err(Error::ExpectedMap(at));
    };
    if !text_keys {
        return Err(Error::InvalidMapKeyType(at));
    }
    if !slot.is_settable() {
        return Err(Error::NotAddressable(at));
    }
    if slot.is_unset() {
        tracing::debug!(path = %at, "initialising unset map");
    }

    let map = slot
        .as_map_mut()
        .ok_or_else(|| Error::NotAddressable(at.clone()))?;
    let depth = nested_depth(map, remaining, &at, path)?;

    let through = &remaining[..depth];
    let key = remaining[remaining.len() - 1].clone();
    let mut target = map;
    for segment in through {
        target = target
            .entry_map(segment)
            .ok_or_else(|| Error::ExpectedMap(at.clone()))?;
    }

    tracing::debug!(%path, map = %at, "registered map entry");
    Ok(Field::new(
        path.clone(),
        FieldSlot::MapEntry {
            map: access.clone(),
            through: through.to_vec(),
            key,
        },
    ))
}

/// Counts the nested map levels `remaining` descends through before reaching a
/// map of values. Segments left over at that map are skipped; the last one is
/// the entry key. Inspects detached elements so nothing is allocated on failure.
fn nested_depth(map: &mut dyn MapSlot, remaining: &[String], at: &Path, path: &Path) -> Result<usize> {
    if !map.text_keys() {
        return Err(Error::InvalidMapKeyType(at.clone()));
    }
    if !map.nested() {
        return Ok(0);
    }

    let Some((segment, rest)) = remaining.split_first().filter(|(_, rest)| !rest.is_empty()) else {
        return Err(Error::InvalidPath {
            path: path.clone(),
            reason: format!("nested map at '{at}' needs a key and an entry"),
        });
    };

    let child_path = at.child(segment.clone());
    let mut fresh = map.fresh_entry();
    let child = fresh
        .as_map_mut()
        .ok_or_else(|| Error::ExpectedMap(child_path.clone()))?;
    Ok(1 + nested_depth(child, rest, &child_path, path)?)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::materialize;
    use crate::error::Error;
    use crate::path::Path;
    use crate::priority::{PriorityTable, ProviderId};
    use crate::providers::MemoryProvider;
    use crate::registry::{identity, leaf, Field, FieldSlot};
    use crate::slot::Pinned;
    use crate::value::Value;

    #[derive(Default)]
    struct Dest {
        labels: HashMap<String, String>,
        routes: Option<BTreeMap<String, HashMap<String, u32>>>,
        ids: HashMap<u32, String>,
        fixed: Pinned<HashMap<String, String>>,
        name: String,
    }

    fn writer() -> ProviderId {
        PriorityTable::default().add(std::sync::Arc::new(MemoryProvider::default()))
    }

    fn field<T: crate::slot::Slot>(name: &str, project: fn(&mut Dest) -> &mut T) -> Field<Dest> {
        Field::new(Path::from([name]), FieldSlot::Leaf(leaf(identity(), project)))
    }

    #[test]
    fn flat_map_entry_uses_last_segment() {
        let mut dest = Dest::default();
        let ancestor = field("labels", |dest| &mut dest.labels);
        let entry = materialize(&mut dest, &ancestor, &Path::from(["labels", "env"]))
            .expect("map entry registers");

        match entry.slot() {
            FieldSlot::MapEntry { through, key, .. } => {
                assert!(through.is_empty());
                assert_eq!(key, "env");
            }
            FieldSlot::Leaf(_) => panic!("expected a map entry"),
        }
        assert!(dest.labels.is_empty());
    }

    #[test]
    fn nested_map_allocates_intermediate_maps() {
        let mut dest = Dest::default();
        let ancestor = field("routes", |dest| &mut dest.routes);
        materialize(&mut dest, &ancestor, &Path::from(["routes", "api", "timeout"]))
            .expect("nested entry registers");

        let routes = dest.routes.expect("unset map was initialised");
        assert!(routes.get("api").is_some_and(HashMap::is_empty));
    }

    #[test]
    fn flat_map_keys_by_last_segment_of_deeper_paths() {
        let mut dest = Dest::default();
        let ancestor = field("labels", |dest| &mut dest.labels);
        let mut entry = materialize(&mut dest, &ancestor, &Path::from(["labels", "a", "b"]))
            .expect("deeper path lands in the flat map");

        match entry.slot() {
            FieldSlot::MapEntry { through, key, .. } => {
                assert!(through.is_empty());
                assert_eq!(key, "b");
            }
            FieldSlot::Leaf(_) => panic!("expected a map entry"),
        }
        entry
            .set(&mut dest, &Value::from("v"), writer())
            .expect("entry is writable");
        assert_eq!(dest.labels.get("b").map(String::as_str), Some("v"));
        assert_eq!(dest.labels.len(), 1);
    }

    #[test]
    fn nested_map_descends_only_through_map_levels() {
        let mut dest = Dest::default();
        let ancestor = field("routes", |dest| &mut dest.routes);
        let mut entry = materialize(&mut dest, &ancestor, &Path::from(["routes", "x", "y", "z"]))
            .expect("extra segments land in the inner map");

        match entry.slot() {
            FieldSlot::MapEntry { through, key, .. } => {
                assert_eq!(through, &vec!["x".to_owned()]);
                assert_eq!(key, "z");
            }
            FieldSlot::Leaf(_) => panic!("expected a map entry"),
        }
        entry
            .set(&mut dest, &Value::from(5), writer())
            .expect("entry is writable");
        let routes = dest.routes.expect("unset map was initialised");
        assert_eq!(routes["x"]["z"], 5);
    }

    #[test]
    fn nested_map_needs_an_entry_below_the_key() {
        let mut dest = Dest::default();
        let ancestor = field("routes", |dest| &mut dest.routes);

        let err = materialize(&mut dest, &ancestor, &Path::from(["routes", "api"]))
            .expect_err("missing entry segment");
        assert!(matches!(err, Error::InvalidPath { .. }));
        assert!(dest.routes.as_ref().is_some_and(BTreeMap::is_empty));
    }

    #[test]
    fn rejects_non_maps_and_bad_keys() {
        let mut dest = Dest::default();

        let name = field("name", |dest| &mut dest.name);
        let err = materialize(&mut dest, &name, &Path::from(["name", "x"])).expect_err("not a map");
        assert!(matches!(err, Error::ExpectedMap(_)));

        let ids = field("ids", |dest| &mut dest.ids);
        let err = materialize(&mut dest, &ids, &Path::from(["ids", "7"])).expect_err("u32 keys");
        assert!(matches!(err, Error::InvalidMapKeyType(_)));

        let fixed = field("fixed", |dest| &mut dest.fixed);
        let err = materialize(&mut dest, &fixed, &Path::from(["fixed", "k"])).expect_err("pinned");
        assert!(matches!(err, Error::NotAddressable(_)));
    }
}
