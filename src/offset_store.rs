//! Where committed offsets are persisted.
//!
//! Offsets are either committed to the group coordinator through the
//! transport ([`BrokerOffsetStore`]) or written to local files
//! ([`FileOffsetStore`]). The method is picked once when the consumer is
//! built.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::offset::{ConsumerGroupId, Offset, TopicPartitionKey};
use crate::offset_tracker::CommitEntry;
use crate::transport::ConsumerTransport;

/// When file stored offsets are flushed to stable storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Never fsync; the OS decides.
    Disabled,
    /// fsync after every commit.
    Immediate,
    /// fsync no less often than every interval.
    Interval(Duration),
}

impl SyncPolicy {
    /// Interpret `offset.store.sync.interval.ms`: -1 disables syncing, 0
    /// syncs on every commit, anything else is an interval.
    pub fn from_interval_ms(interval_ms: i64) -> Result<Self> {
        match interval_ms {
            -1 => Ok(SyncPolicy::Disabled),
            0 => Ok(SyncPolicy::Immediate),
            ms if ms > 0 => Ok(SyncPolicy::Interval(Duration::from_millis(ms as u64))),
            ms => Err(Error::InvalidConfig {
                key: "offset.store.sync.interval.ms".to_owned(),
                value: ms.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OffsetStoreMethod {
    #[default]
    Broker,
    File { path: PathBuf, sync: SyncPolicy },
}

#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Persist the next offset to read for each partition.
    async fn store(&self, offsets: &[CommitEntry]) -> Result<()>;

    /// Stored next offset to read, if the group has one.
    async fn load(&self, partition: &TopicPartitionKey) -> Result<Option<Offset>>;

    /// Flush buffered offsets to stable storage when the store's policy says
    /// it is due, or unconditionally with `force`.
    async fn flush(&self, _force: bool) -> Result<()> {
        Ok(())
    }
}

/// Build the store selected by `method`.
pub fn open_store<T: ConsumerTransport>(
    method: &OffsetStoreMethod,
    group: ConsumerGroupId,
    transport: Arc<T>,
) -> Arc<dyn OffsetStore> {
    match method {
        OffsetStoreMethod::Broker => Arc::new(BrokerOffsetStore::new(transport, group)),
        OffsetStoreMethod::File { path, sync } => {
            Arc::new(FileOffsetStore::new(path.clone(), group, *sync))
        }
    }
}

/// Offsets committed to the group coordinator.
pub struct BrokerOffsetStore<T> {
    transport: Arc<T>,
    group: ConsumerGroupId,
}

impl<T: ConsumerTransport> BrokerOffsetStore<T> {
    pub fn new(transport: Arc<T>, group: ConsumerGroupId) -> Self {
        Self { transport, group }
    }
}

#[async_trait]
impl<T: ConsumerTransport> OffsetStore for BrokerOffsetStore<T> {
    #[instrument(level = "debug", skip(self, offsets), fields(group = %self.group))]
    async fn store(&self, offsets: &[CommitEntry]) -> Result<()> {
        tracing::debug!("Committing {} offsets to broker", offsets.len());
        self.transport.commit(&self.group, offsets).await
    }

    async fn load(&self, partition: &TopicPartitionKey) -> Result<Option<Offset>> {
        self.transport.committed(&self.group, partition).await
    }
}

struct SyncState {
    unsynced: BTreeSet<PathBuf>,
    last_sync: Instant,
}

/// Offsets kept in one small text file per partition.
///
/// Each file holds the next offset to read followed by a newline. Files are
/// replaced by writing a sibling `.tmp` file and renaming it over the old
/// one, so a reader sees either the previous offset or the new one. An
/// empty file loads as no stored offset.
pub struct FileOffsetStore {
    dir: PathBuf,
    group: ConsumerGroupId,
    sync: SyncPolicy,
    state: Mutex<SyncState>,
}

impl FileOffsetStore {
    pub fn new(dir: PathBuf, group: ConsumerGroupId, sync: SyncPolicy) -> Self {
        Self {
            dir,
            group,
            sync,
            state: Mutex::new(SyncState {
                unsynced: BTreeSet::new(),
                last_sync: Instant::now(),
            }),
        }
    }

    pub fn path_for(&self, partition: &TopicPartitionKey) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}.offset",
            sanitize(&partition.topic),
            partition.partition,
            sanitize(self.group.as_str())
        ))
    }

    /// Files written but not yet flushed to stable storage.
    pub fn unsynced(&self) -> usize {
        self.state.lock().unsynced.len()
    }

    async fn sync_files(&self) -> Result<()> {
        let paths = {
            let mut state = self.state.lock();
            state.last_sync = Instant::now();
            std::mem::take(&mut state.unsynced)
        };
        if paths.is_empty() {
            return Ok(());
        }

        tracing::trace!("Syncing {} offset files", paths.len());
        let mut failed = None;
        for path in paths.iter().chain(std::iter::once(&self.dir)) {
            if let Err(err) = sync_file(path).await {
                tracing::error!("Failed to sync {}: {:?}", path.display(), err);
                failed = Some(err);
            }
        }

        match failed {
            Some(err) => {
                self.state.lock().unsynced.extend(paths);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn sync_due(&self) -> bool {
        match self.sync {
            SyncPolicy::Disabled => false,
            SyncPolicy::Immediate => true,
            SyncPolicy::Interval(interval) => self.state.lock().last_sync.elapsed() >= interval,
        }
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    #[instrument(level = "debug", skip(self, offsets), fields(group = %self.group))]
    async fn store(&self, offsets: &[CommitEntry]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        for entry in offsets {
            let path = self.path_for(&entry.partition);
            let staged = path.with_extension("offset.tmp");
            tokio::fs::write(&staged, format!("{}\n", entry.offset)).await?;
            tokio::fs::rename(&staged, &path).await?;
            tracing::trace!("Wrote offset {} to {}", entry.offset, path.display());
            if self.sync != SyncPolicy::Disabled {
                self.state.lock().unsynced.insert(path);
            }
        }

        if self.sync_due() {
            self.sync_files().await?;
        }
        Ok(())
    }

    async fn load(&self, partition: &TopicPartitionKey) -> Result<Option<Offset>> {
        let path = self.path_for(partition);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let contents = contents.trim();
        if contents.is_empty() {
            tracing::warn!("Empty offset file {}, treating as unset", path.display());
            return Ok(None);
        }
        contents
            .parse::<i64>()
            .ok()
            .and_then(|raw| Offset::new(raw).ok())
            .map(Some)
            .ok_or_else(|| Error::CorruptOffsetFile(path.display().to_string()))
    }

    async fn flush(&self, force: bool) -> Result<()> {
        if self.sync == SyncPolicy::Disabled {
            return Ok(());
        }
        if force || self.sync_due() {
            self.sync_files().await?;
        }
        Ok(())
    }
}

async fn sync_file(path: &Path) -> Result<()> {
    let file = tokio::fs::File::open(path).await?;
    file.sync_all().await?;
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '%',
        })
        .collect()
}
