use std::collections::BTreeMap;
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::provider::{Provider, Sink};
use crate::providers::{join_names, walk_map, Format};

pub const PROVIDER_NAME: &str = "Files";

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileFingerprint {
    size: u64,
    modified_epoch_millis: u128,
}

/// Reads every file under a root directory matching any of a set of glob
/// patterns. Files are applied in pattern order, then by path; a file matched
/// by several patterns is read once per fetch.
pub struct FileProvider {
    name: String,
    root: PathBuf,
    matcher: Arc<GlobSet>,
    format: Option<Format>,
    poll_interval: Option<Duration>,
    stop: CancellationToken,
}

impl FileProvider {
    /// Patterns are matched against paths relative to the current directory.
    /// Each file's format is picked from its extension unless set with
    /// [`FileProvider::with_format`].
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern.trim_start_matches("./"))
                .literal_separator(true)
                .build()
                .map_err(|err| Error::Config(format!("invalid glob '{pattern}': {err}")))?;
            builder.add(glob);
        }
        let matcher = builder
            .build()
            .map_err(|err| Error::Config(format!("failed to build glob set: {err}")))?;

        Ok(Self {
            name: PROVIDER_NAME.to_owned(),
            root: PathBuf::from("."),
            matcher: Arc::new(matcher),
            format: None,
            poll_interval: None,
            stop: CancellationToken::new(),
        })
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.name = join_names([format.name(), PROVIDER_NAME]);
        self.format = Some(format);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    async fn read_matches(&self) -> Result<Vec<(PathBuf, String)>> {
        let root = self.root.clone();
        let matcher = Arc::clone(&self.matcher);
        tokio::task::spawn_blocking(move || {
            matching_files(&root, &matcher)
                .into_iter()
                .map(|path| {
                    let text = fs::read_to_string(&path).map_err(|err| {
                        Error::Provider(format!("failed to read '{}': {err}", path.display()))
                    })?;
                    Ok((path, text))
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|err| Error::Provider(format!("file scan task failed: {err}")))?
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn values(&self, cancel: &CancellationToken, sink: &mut dyn Sink) -> Result<()> {
        for (path, text) in self.read_matches().await? {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let format = self
                .format
                .or_else(|| Format::from_extension(&path))
                .ok_or_else(|| {
                    Error::Decode(format!("cannot infer the format of '{}'", path.display()))
                })?;
            tracing::debug!(provider = %self.name, file = %path.display(), %format, "reading file");
            let values = format.decode(&text)?;
            walk_map(cancel, &values, sink).await?;
        }
        Ok(())
    }

    fn changes(&self) -> Result<Option<mpsc::Receiver<()>>> {
        let Some(interval) = self.poll_interval else {
            return Ok(None);
        };
        if interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_owned()));
        }

        let (sender, receiver) = mpsc::channel(1);
        let root = self.root.clone();
        let matcher = Arc::clone(&self.matcher);
        let stop = self.stop.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut previous = None;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let root = root.clone();
                        let matcher = Arc::clone(&matcher);
                        let current = match tokio::task::spawn_blocking(move || {
                            fingerprints(&root, &matcher)
                        })
                        .await
                        {
                            Ok(current) => current,
                            Err(err) => {
                                tracing::warn!(%err, provider = %name, "file poll failed");
                                continue;
                            }
                        };

                        let changed = previous.as_ref().is_some_and(|previous| previous != &current);
                        previous = Some(current);
                        if changed {
                            tracing::debug!(provider = %name, "files changed");
                            if let Err(mpsc::error::TrySendError::Closed(())) = sender.try_send(()) {
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Some(receiver))
    }

    async fn close(&self) -> Result<()> {
        self.stop.cancel();
        Ok(())
    }
}

fn matching_files(root: &FsPath, matcher: &GlobSet) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(true);

    let mut matched = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        if let Some(first) = matcher.matches(relative).into_iter().min() {
            matched.push((first, path.to_path_buf()));
        }
    }

    matched.sort();
    matched.into_iter().map(|(_, path)| path).collect()
}

fn fingerprints(root: &FsPath, matcher: &GlobSet) -> BTreeMap<PathBuf, FileFingerprint> {
    matching_files(root, matcher)
        .into_iter()
        .filter_map(|path| {
            let metadata = fs::metadata(&path).ok()?;
            let modified_epoch_millis = metadata
                .modified()
                .ok()
                .and_then(|value| value.duration_since(UNIX_EPOCH).ok())
                .map(|value| value.as_millis())
                .unwrap_or(0);
            Some((
                path,
                FileFingerprint {
                    size: metadata.len(),
                    modified_epoch_millis,
                },
            ))
        })
        .collect()
}
