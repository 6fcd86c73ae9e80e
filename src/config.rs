//! String keyed client configuration.
//!
//! Applications that already carry librdkafka style property maps (from a
//! file, environment, a service config) can hand them over as a
//! [`ClientConfig`] and build typed settings from it. The builders expose the
//! same options as methods.
//!
//! Recognized consumer keys: `group.id`, `client.id`, `auto.offset.reset`,
//! `offset.store.method`, `offset.store.path`,
//! `offset.store.sync.interval.ms`, `enable.auto.commit`,
//! `auto.commit.interval.ms`, `commit.mode`.
//!
//! Recognized producer keys: `client.id`, `queue.buffering.max.messages`,
//! `batch.num.messages`, `linger.ms`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::offset::ConsumerGroupId;
use crate::offset_store::{OffsetStoreMethod, SyncPolicy};
use crate::offset_tracker::CommitMode;
use crate::DEFAULT_CLIENT_ID;

pub(crate) const DEFAULT_AUTO_COMMIT_INTERVAL_MS: u64 = 5000;
pub(crate) const DEFAULT_OFFSET_STORE_PATH: &str = ".";
pub(crate) const DEFAULT_OFFSET_STORE_SYNC_INTERVAL_MS: i64 = -1;
pub(crate) const DEFAULT_QUEUE_MAX_MESSAGES: usize = 100_000;
pub(crate) const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub(crate) const DEFAULT_LINGER_MS: u64 = 5;

const CONSUMER_KEYS: &[&str] = &[
    "group.id",
    "client.id",
    "auto.offset.reset",
    "offset.store.method",
    "offset.store.path",
    "offset.store.sync.interval.ms",
    "enable.auto.commit",
    "auto.commit.interval.ms",
    "commit.mode",
];

const PRODUCER_KEYS: &[&str] = &[
    "client.id",
    "queue.buffering.max.messages",
    "batch.num.messages",
    "linger.ms",
];

/// Where to start reading a partition the group has no stored offset for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl FromStr for OffsetReset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "earliest" | "smallest" | "beginning" => Ok(OffsetReset::Earliest),
            "latest" | "largest" | "end" => Ok(OffsetReset::Latest),
            _ => Err(invalid("auto.offset.reset", s)),
        }
    }
}

impl FromStr for CommitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sync" | "blocking" => Ok(CommitMode::Sync),
            "async" => Ok(CommitMode::Async),
            _ => Err(invalid("commit.mode", s)),
        }
    }
}

/// Librdkafka style `key = value` configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientConfig {
    values: HashMap<String, String>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|value| value.trim().parse::<T>().map_err(|_| invalid(key, value)))
            .transpose()
    }

    fn warn_unknown(&self, known: &[&str]) {
        for key in self.values.keys() {
            if !known.contains(&key.as_str()) {
                tracing::debug!("Ignoring unrecognized config {}", key);
            }
        }
    }

    pub fn consumer_config(&self) -> Result<ConsumerConfig> {
        self.warn_unknown(CONSUMER_KEYS);

        let group_id = self
            .get("group.id")
            .ok_or(Error::MissingConfig("group.id"))?;
        let mut config = ConsumerConfig::new(ConsumerGroupId::new(group_id)?);

        if let Some(client_id) = self.get("client.id") {
            config.client_id = client_id.to_owned();
        }
        if let Some(offset_reset) = self.parse::<OffsetReset>("auto.offset.reset")? {
            config.offset_reset = offset_reset;
        }
        if let Some(enable) = self.parse::<bool>("enable.auto.commit")? {
            config.enable_auto_commit = enable;
        }
        if let Some(interval_ms) = self.parse::<u64>("auto.commit.interval.ms")? {
            config.auto_commit_interval = Duration::from_millis(interval_ms);
        }
        if let Some(commit_mode) = self.parse::<CommitMode>("commit.mode")? {
            config.commit_mode = commit_mode;
        }

        config.offset_store = match self.get("offset.store.method").unwrap_or("broker") {
            "broker" => OffsetStoreMethod::Broker,
            "file" => {
                let path = self
                    .get("offset.store.path")
                    .unwrap_or(DEFAULT_OFFSET_STORE_PATH);
                let interval_ms = self
                    .parse::<i64>("offset.store.sync.interval.ms")?
                    .unwrap_or(DEFAULT_OFFSET_STORE_SYNC_INTERVAL_MS);
                OffsetStoreMethod::File {
                    path: PathBuf::from(path),
                    sync: SyncPolicy::from_interval_ms(interval_ms)?,
                }
            }
            other => return Err(invalid("offset.store.method", other)),
        };

        Ok(config)
    }

    pub fn producer_config(&self) -> Result<ProducerConfig> {
        self.warn_unknown(PRODUCER_KEYS);

        let mut config = ProducerConfig::default();
        if let Some(client_id) = self.get("client.id") {
            config.client_id = client_id.to_owned();
        }
        if let Some(max_messages) = self.parse::<usize>("queue.buffering.max.messages")? {
            if max_messages == 0 {
                return Err(invalid("queue.buffering.max.messages", "0"));
            }
            config.queue_max_messages = max_messages;
        }
        if let Some(batch_size) = self.parse::<usize>("batch.num.messages")? {
            if batch_size == 0 {
                return Err(invalid("batch.num.messages", "0"));
            }
            config.max_batch_size = batch_size;
        }
        if let Some(linger_ms) = self.parse::<u64>("linger.ms")? {
            config.linger = Duration::from_millis(linger_ms);
        }
        Ok(config)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ClientConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Typed consumer settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumerConfig {
    pub group_id: ConsumerGroupId,
    pub client_id: String,
    pub offset_reset: OffsetReset,
    pub offset_store: OffsetStoreMethod,
    pub commit_mode: CommitMode,
    pub enable_auto_commit: bool,
    pub auto_commit_interval: Duration,
}

impl ConsumerConfig {
    pub fn new(group_id: ConsumerGroupId) -> Self {
        Self {
            group_id,
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            offset_reset: OffsetReset::default(),
            offset_store: OffsetStoreMethod::default(),
            commit_mode: CommitMode::default(),
            enable_auto_commit: false,
            auto_commit_interval: Duration::from_millis(DEFAULT_AUTO_COMMIT_INTERVAL_MS),
        }
    }
}

/// Typed producer settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ProducerConfig {
    pub client_id: String,
    /// Capacity of the local send queue.
    pub queue_max_messages: usize,
    pub max_batch_size: usize,
    /// Longest a record waits in the queue for its batch to fill.
    pub linger: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            queue_max_messages: DEFAULT_QUEUE_MAX_MESSAGES,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            linger: Duration::from_millis(DEFAULT_LINGER_MS),
        }
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn it_requires_a_group_id() {
        let config = ClientConfig::new();
        assert_eq!(
            config.consumer_config(),
            Err(Error::MissingConfig("group.id"))
        );
    }

    #[test]
    fn it_parses_consumer_settings() {
        let config: ClientConfig = [
            ("group.id", "billing"),
            ("auto.offset.reset", "smallest"),
            ("offset.store.method", "file"),
            ("offset.store.path", "/var/lib/billing"),
            ("offset.store.sync.interval.ms", "0"),
            ("enable.auto.commit", "true"),
            ("auto.commit.interval.ms", "250"),
            ("commit.mode", "async"),
            ("socket.keepalive.enable", "true"),
        ]
        .into_iter()
        .collect();

        let consumer = config.consumer_config().unwrap();
        assert_eq!(consumer.group_id.as_str(), "billing");
        assert_eq!(consumer.offset_reset, OffsetReset::Earliest);
        assert_eq!(
            consumer.offset_store,
            OffsetStoreMethod::File {
                path: PathBuf::from("/var/lib/billing"),
                sync: SyncPolicy::Immediate
            }
        );
        assert!(consumer.enable_auto_commit);
        assert_eq!(consumer.auto_commit_interval, Duration::from_millis(250));
        assert_eq!(consumer.commit_mode, CommitMode::Async);
    }

    #[test]
    fn it_defaults_to_broker_storage() {
        let mut config = ClientConfig::new();
        config.set("group.id", "billing");

        let consumer = config.consumer_config().unwrap();
        assert_eq!(consumer.offset_store, OffsetStoreMethod::Broker);
        assert_eq!(consumer.offset_reset, OffsetReset::Latest);
        assert_eq!(consumer.commit_mode, CommitMode::Sync);
        assert!(!consumer.enable_auto_commit);
    }

    #[test]
    fn it_rejects_malformed_values() {
        let mut config = ClientConfig::new();
        config
            .set("group.id", "billing")
            .set("auto.offset.reset", "sideways");
        assert_eq!(
            config.consumer_config(),
            Err(Error::InvalidConfig {
                key: "auto.offset.reset".to_owned(),
                value: "sideways".to_owned()
            })
        );

        config
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "maybe");
        assert!(config.consumer_config().is_err());
    }

    #[test]
    fn it_parses_producer_settings() {
        let config: ClientConfig = [
            ("queue.buffering.max.messages", "10"),
            ("batch.num.messages", "4"),
            ("linger.ms", "0"),
        ]
        .into_iter()
        .collect();

        let producer = config.producer_config().unwrap();
        assert_eq!(producer.queue_max_messages, 10);
        assert_eq!(producer.max_batch_size, 4);
        assert_eq!(producer.linger, Duration::ZERO);

        let config: ClientConfig = [("batch.num.messages", "0")].into_iter().collect();
        assert!(config.producer_config().is_err());
    }
}
