mod memory;

use std::num::NonZeroU16;

use anyhow::Result;
use async_trait::async_trait;
use bytestring::ByteString;
use codec::{LastWill, Publish, SubscribeFilter};

use crate::filter::TopicFilter;
use crate::message::Message;

pub use memory::StorageMemory as MemoryStorage;

/// A snapshot of a client's persisted session, used when a storage backend
/// needs to report what it's holding (e.g. on startup for a backend that
/// actually persists across restarts).
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub client_id: ByteString,
    pub last_will: Option<LastWill>,
    pub session_expiry_interval: u32,
    pub last_will_expiry_interval: u32,
}

#[derive(Debug, Default)]
pub struct StorageMetrics {
    pub session_count: usize,
    pub inflight_messages_count: usize,
    pub retained_messages_count: usize,
    pub messages_count: usize,
    pub messages_bytes: usize,
    pub subscriptions_count: usize,
}

/// Everything the broker core needs from a session/message store.
///
/// An implementation owns all sessions, retained messages and share-group
/// membership; the connection state machine in `client_loop` never reaches
/// into session internals directly.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn update_retained_message(&self, topic: ByteString, msg: Message) -> Result<()>;

    async fn create_session(
        &self,
        client_id: ByteString,
        clean_start: bool,
        last_will: Option<LastWill>,
        session_expiry_interval: u32,
        last_will_expiry_interval: u32,
    ) -> Result<(bool, std::sync::Arc<tokio::sync::Notify>)>;

    async fn remove_session(&self, client_id: &str) -> Result<bool>;

    async fn get_sessions(&self) -> Result<Vec<SessionInfo>>;

    async fn subscribe(
        &self,
        client_id: &str,
        subscribe_filter: SubscribeFilter,
        topic_filter: TopicFilter,
        id: Option<usize>,
    ) -> Result<()>;

    async fn unsubscribe(
        &self,
        client_id: &str,
        path: &str,
        topic_filter: TopicFilter,
    ) -> Result<bool>;

    async fn next_messages(&self, client_id: &str, limit: Option<usize>) -> Result<Vec<Message>>;

    async fn consume_messages(&self, client_id: &str, count: usize) -> Result<()>;

    async fn publish(&self, msgs: Vec<Message>) -> Result<()>;

    async fn add_inflight_pub_packet(&self, client_id: &str, publish: Publish) -> Result<()>;

    async fn get_inflight_pub_packets(
        &self,
        client_id: &str,
        packet_id: NonZeroU16,
        remove: bool,
    ) -> Result<Option<Publish>>;

    async fn get_all_inflight_pub_packets(&self, client_id: &str) -> Result<Vec<Publish>>;

    async fn add_uncompleted_message(
        &self,
        client_id: &str,
        packet_id: NonZeroU16,
        msg: Message,
    ) -> Result<bool>;

    async fn get_uncompleted_message(
        &self,
        client_id: &str,
        packet_id: NonZeroU16,
        remove: bool,
    ) -> Result<Option<Message>>;

    async fn metrics(&self) -> Result<StorageMetrics>;
}
