use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClientConfig, ConsumerConfig, OffsetReset};
use crate::consumer::{ConsumerContext, DefaultConsumerContext, KafkaConsumer};
use crate::error::Result;
use crate::offset::ConsumerGroupId;
use crate::offset_store::{OffsetStoreMethod, SyncPolicy};
use crate::offset_tracker::CommitMode;
use crate::transport::ConsumerTransport;

/// Configure a [`KafkaConsumer`].
pub struct ConsumerBuilder<T: ConsumerTransport, C: ConsumerContext = DefaultConsumerContext> {
    transport: Arc<T>,
    config: ConsumerConfig,
    context: C,
}

impl<T: ConsumerTransport> ConsumerBuilder<T> {
    /// Start a consumer builder. To complete, use the [`build`](Self::build) method.
    pub fn new(transport: T, group_id: impl Into<String>) -> Result<Self> {
        Self::with_shared_transport(Arc::new(transport), group_id)
    }

    pub fn with_shared_transport(transport: Arc<T>, group_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            transport,
            config: ConsumerConfig::new(ConsumerGroupId::new(group_id)?),
            context: DefaultConsumerContext,
        })
    }

    /// Start from a librdkafka style property map. `group.id` is required.
    pub fn from_config(transport: T, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(transport),
            config: config.consumer_config()?,
            context: DefaultConsumerContext,
        })
    }
}

impl<T: ConsumerTransport, C: ConsumerContext> ConsumerBuilder<T, C> {
    /// Hooks for rebalance and commit notifications.
    pub fn context<C2: ConsumerContext>(self, context: C2) -> ConsumerBuilder<T, C2> {
        ConsumerBuilder {
            transport: self.transport,
            config: self.config,
            context,
        }
    }

    /// Where to start partitions the group has no stored offset for.
    pub fn offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.config.offset_reset = offset_reset;
        self
    }

    pub fn offset_store(mut self, offset_store: OffsetStoreMethod) -> Self {
        self.config.offset_store = offset_store;
        self
    }

    /// Store offsets as files under `path` instead of on the broker.
    pub fn file_offset_store(self, path: impl Into<PathBuf>, sync: SyncPolicy) -> Self {
        self.offset_store(OffsetStoreMethod::File {
            path: path.into(),
            sync,
        })
    }

    /// Mode used by [`KafkaConsumer::commit`] and auto commits.
    pub fn commit_mode(mut self, commit_mode: CommitMode) -> Self {
        self.config.commit_mode = commit_mode;
        self
    }

    pub fn enable_auto_commit(mut self, enable_auto_commit: bool) -> Self {
        self.config.enable_auto_commit = enable_auto_commit;
        self
    }

    /// How often [`KafkaConsumer::poll`] commits when auto commit is enabled.
    pub fn auto_commit_interval_ms(mut self, auto_commit_interval_ms: u64) -> Self {
        self.config.auto_commit_interval = Duration::from_millis(auto_commit_interval_ms);
        self
    }

    pub fn client_id(mut self, client_id: String) -> Self {
        self.config.client_id = client_id;
        self
    }

    pub fn build(self) -> KafkaConsumer<T, C> {
        tracing::debug!(
            "Building consumer {} for group {}",
            self.config.client_id,
            self.config.group_id
        );
        KafkaConsumer::new(self.transport, self.config, self.context)
    }
}
