//! The Metadata Center: a concurrently-read, periodically-rescanned index of container
//! descriptors, kept fresh by both a scan ticker and filesystem change notifications.
//!
//! Uses a glob + `notify` watcher with a fallback rescan for discovery, and an `ArcSwap`-backed
//! snapshot for hand-off between the writer task and many lock-free readers.

pub mod descriptor;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{GlobSnafu, MetadataError, WatchSnafu};

/// Opaque container identifier, as carried on [`crate::event::LogEvent::id`] lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub String);

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        ContainerId(s.to_string())
    }
}

/// A container's descriptor, as exposed to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub source_path: PathBuf,
}

/// Static configuration for a [`MetadataCenter`].
#[derive(Debug, Clone)]
pub struct MetadataCenterConfig {
    pub root_path: PathBuf,
    pub env_include: Vec<String>,
    pub sync_interval: Duration,
    pub max_expired_duration: Duration,
}

struct IndexEntry {
    info: ContainerInfo,
    last_seen: Instant,
}

type Index = HashMap<ContainerId, IndexEntry>;

/// The concurrent index itself, plus the background tasks that keep it fresh.
pub struct MetadataCenter {
    root_path: PathBuf,
    glob_pattern: String,
    env_include: HashSet<String>,
    sync_interval: Duration,
    max_expired_duration: Duration,

    index: Arc<ArcSwap<Index>>,
    cancel: CancellationToken,
    watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
    watch_rx: std::sync::Mutex<Option<std::sync::mpsc::Receiver<notify::Result<notify::Event>>>>,
    scan_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    watch_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MetadataCenter {
    pub fn new(config: MetadataCenterConfig) -> Self {
        let glob_pattern = config
            .root_path
            .join("*")
            .join(descriptor::CONFIG_FILE_NAME)
            .to_string_lossy()
            .into_owned();

        MetadataCenter {
            root_path: config.root_path,
            glob_pattern,
            env_include: config.env_include.into_iter().collect(),
            sync_interval: config.sync_interval,
            max_expired_duration: config.max_expired_duration,
            index: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            cancel: CancellationToken::new(),
            watcher: std::sync::Mutex::new(None),
            watch_rx: std::sync::Mutex::new(None),
            scan_task: std::sync::Mutex::new(None),
            watch_task: std::sync::Mutex::new(None),
        }
    }

    /// Sets up the filesystem watcher and performs one full scan. Fails if the root can't be
    /// watched, or if a descriptor fails to parse during this initial scan.
    pub fn init(&self) -> Result<(), MetadataError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx).context(WatchSnafu {
            root: self.root_path.to_string_lossy().into_owned(),
        })?;
        watcher
            .watch(&self.root_path, RecursiveMode::Recursive)
            .context(WatchSnafu {
                root: self.root_path.to_string_lossy().into_owned(),
            })?;

        *self.watcher.lock().unwrap() = Some(watcher);
        *self.watch_rx.lock().unwrap() = Some(rx);

        self.scan(true)
    }

    /// Spawns the periodic scanner and the change-watcher tasks. Idempotent: calling twice has no
    /// additional effect beyond the first call (the second call's tasks are simply dropped
    /// handles, since `self` is typically owned behind an `Arc` by callers that only `start()`
    /// once).
    pub fn start(self: &Arc<Self>) {
        let scan_center = Arc::clone(self);
        let scan_cancel = self.cancel.clone();
        let scan_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scan_center.sync_interval);
            ticker.tick().await; // first tick fires immediately; skip it, init() already scanned
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = scan_center.scan(false) {
                            error!(message = "periodic metadata scan failed", error = %err);
                        }
                    }
                    _ = scan_cancel.cancelled() => {
                        debug!("metadata scan task stopping");
                        break;
                    }
                }
            }
        });
        *self.scan_task.lock().unwrap() = Some(scan_handle);

        let rx = self.watch_rx.lock().unwrap().take();
        if let Some(rx) = rx {
            let watch_center = Arc::clone(self);
            let watch_cancel = self.cancel.clone();
            let watch_handle = tokio::spawn(async move {
                watch_center.watch_loop(rx, watch_cancel).await;
            });
            *self.watch_task.lock().unwrap() = Some(watch_handle);
        }
    }

    /// Lock-free, allocation-free read of the current snapshot.
    pub fn get_info(&self, id: &str) -> Option<ContainerInfo> {
        let snapshot = self.index.load();
        snapshot.get(&ContainerId(id.to_string())).map(|e| e.info.clone())
    }

    /// Signals both background tasks to stop and releases the watcher. Safe to call more than
    /// once.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.scan_task.lock().unwrap().take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.watch_task.lock().unwrap().take() {
            let _ = handle.await;
        }
        *self.watcher.lock().unwrap() = None;
    }

    fn scan(&self, initial: bool) -> Result<(), MetadataError> {
        let paths = glob::glob(&self.glob_pattern).context(GlobSnafu {
            root: self.root_path.to_string_lossy().into_owned(),
        })?;

        let now = Instant::now();
        let previous = self.index.load();
        let mut next: Index = HashMap::with_capacity(previous.len());
        let mut seen: HashSet<ContainerId> = HashSet::new();

        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(message = "failed to glob descriptor path", error = %err);
                    continue;
                }
            };

            match self.read_and_convert(&path) {
                Ok(info) => {
                    seen.insert(info.id.clone());
                    next.insert(info.id.clone(), IndexEntry { info, last_seen: now });
                }
                Err(err) => {
                    if initial {
                        return Err(err);
                    }
                    warn!(message = "failed to read container descriptor, skipping", error = %err, path = %path.display());
                }
            }
        }

        // Carry over entries missing from this scan unless they've expired.
        for (id, entry) in previous.iter() {
            if seen.contains(id) {
                continue;
            }
            if now.duration_since(entry.last_seen) < self.max_expired_duration {
                next.insert(
                    id.clone(),
                    IndexEntry {
                        info: entry.info.clone(),
                        last_seen: entry.last_seen,
                    },
                );
            } else {
                debug!(message = "evicting expired container metadata", container_id = %id.0);
            }
        }

        self.index.store(Arc::new(next));
        Ok(())
    }

    fn read_and_convert(&self, path: &Path) -> Result<ContainerInfo, MetadataError> {
        let raw = descriptor::read_descriptor(path).map_err(|source| match source {
            descriptor::DescriptorError::Read { path, source } => MetadataError::ReadDescriptor {
                path: path.to_string_lossy().into_owned(),
                source,
            },
            descriptor::DescriptorError::Parse { path, source } => MetadataError::ParseDescriptor {
                path: path.to_string_lossy().into_owned(),
                source,
            },
        })?;
        Ok(descriptor::convert(raw, &self.env_include, path))
    }

    async fn watch_loop(
        &self,
        rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
        cancel: CancellationToken,
    ) {
        loop {
            let recv = tokio::task::spawn_blocking({
                let rx_timeout = Duration::from_millis(500);
                move || rx.recv_timeout(rx_timeout)
            });

            tokio::select! {
                result = recv => {
                    match result {
                        Ok(Ok(Ok(event))) => {
                            if matches!(event.kind, notify::EventKind::Create(_)) {
                                self.handle_create(event).await;
                            }
                            // Delete events are ignored; eviction is the scanner's job.
                            continue;
                        }
                        Ok(Ok(Err(err))) => {
                            error!(message = "metadata watcher error", error = %err);
                            continue;
                        }
                        Ok(Err(_timeout_or_disconnect)) => {
                            // Either a recv timeout (normal, re-check cancellation) or the
                            // channel disconnected (watcher dropped) - either way just loop
                            // and let the cancellation check below decide whether to stop.
                        }
                        Err(join_err) => {
                            error!(message = "metadata watcher task panicked", error = %join_err);
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("metadata watch task stopping");
                    break;
                }
            }
        }
    }

    async fn handle_create(&self, event: notify::Event) {
        for path in event.paths {
            if path.file_name().and_then(|n| n.to_str()) != Some(descriptor::CONFIG_FILE_NAME) {
                continue;
            }
            // Let the container runtime finish writing the file before we read it.
            tokio::time::sleep(Duration::from_secs(2)).await;

            match self.read_and_convert(&path) {
                Ok(info) => {
                    info!(message = "discovered new container via watch", container_id = %info.id.0);
                    let now = Instant::now();
                    let previous = self.index.load();
                    let mut next: Index = HashMap::with_capacity(previous.len() + 1);
                    for (id, entry) in previous.iter() {
                        next.insert(id.clone(), IndexEntry { info: entry.info.clone(), last_seen: entry.last_seen });
                    }
                    next.insert(info.id.clone(), IndexEntry { info, last_seen: now });
                    self.index.store(Arc::new(next));
                }
                Err(err) => {
                    warn!(message = "failed to read newly discovered descriptor", error = %err, path = %path.display());
                }
            }
        }
    }
}
