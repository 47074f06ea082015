//! Last-observed modification times for deployed artifacts.
//!
//! One index exists per artifact family of a deployment (classes, web resources).
//! It is seeded once when the deployment activates and then only grows as
//! patches are accepted.

use std::{
    collections::HashMap,
    io,
    path::Path,
    sync::OnceLock,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;
use time::UtcOffset;

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Relative `/`-separated artifact path mapped to epoch-millisecond mtime.
pub type KnownArtifactMap = HashMap<String, i64>;

/// Concurrency-safe record of artifact modification times.
///
/// Readers never block each other; a writer only holds the lock for the
/// duration of a single insert, so concurrent recorders see last-write-wins.
#[derive(Debug, Default)]
pub struct ModificationTimeIndex {
    entries: RwLock<KnownArtifactMap>,
}

impl ModificationTimeIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or overwrite) the timestamp observed for `path`.
    pub fn record(&self, path: impl Into<String>, modified_ms: i64) {
        self.entries.write().insert(path.into(), modified_ms);
    }

    /// Record every entry of `map`, overwriting existing timestamps.
    pub fn record_all(&self, map: KnownArtifactMap) {
        self.entries.write().extend(map);
    }

    /// Look up the last recorded timestamp for `path`.
    pub fn lookup(&self, path: &str) -> Option<i64> {
        self.entries.read().get(path).copied()
    }

    /// Copy of every recorded entry.
    pub fn snapshot_all(&self) -> KnownArtifactMap {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Known-state indexes owned by one deployment.
#[derive(Debug, Default)]
pub struct ArtifactIndexes {
    pub classes: ModificationTimeIndex,
    pub web_resources: ModificationTimeIndex,
}

/// Modification time of `path` in epoch milliseconds.
pub fn modified_millis(path: &Path) -> io::Result<i64> {
    let modified = path.metadata()?.modified()?;
    Ok(system_time_millis(modified))
}

/// Convert a [`SystemTime`] to epoch milliseconds, clamping pre-epoch times to zero.
pub fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

/// Offset of the local zone, captured on first use.
///
/// The platform refuses to report it once the process is multi-threaded, so
/// binaries call this before logging starts its writer thread. Falls back to UTC.
pub fn local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}
