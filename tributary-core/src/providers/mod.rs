//! Ready-made providers. The engine itself decodes nothing; these adapters
//! turn common sources into (path, value) pairs.

pub mod decode;
pub mod file;
pub mod memory;

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::path::Path;
use crate::provider::Sink;
use crate::value::Value;

pub use decode::{Format, TextProvider};
pub use file::FileProvider;
pub use memory::MemoryProvider;

/// Joins provider names into one, e.g. `json.Files`.
pub fn join_names<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().to_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Writes every leaf of `map` to `sink`. Nested maps extend the path; empty
/// maps produce nothing.
pub async fn walk_map(
    cancel: &CancellationToken,
    map: &BTreeMap<String, Value>,
    sink: &mut dyn Sink,
) -> Result<()> {
    let mut pairs = Vec::new();
    flatten(&Path::root(), map, &mut pairs);

    for (path, value) in pairs {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        sink.write(path, value).await?;
    }
    Ok(())
}

fn flatten(prefix: &Path, map: &BTreeMap<String, Value>, pairs: &mut Vec<(Path, Value)>) {
    for (key, value) in map {
        let path = prefix.child(key.as_str());
        match value {
            Value::Map(nested) => flatten(&path, nested, pairs),
            other => pairs.push((path, other.clone())),
        }
    }
}
