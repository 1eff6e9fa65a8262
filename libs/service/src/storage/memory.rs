use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU16;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use bytestring::ByteString;
use codec::{LastWill, Publish, Qos, RetainHandling, SubscribeFilter};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::filter::TopicFilter;
use crate::message::Message;
use crate::retained::RetainedTrie;
use crate::storage::{SessionInfo, Storage, StorageMetrics};
use crate::subscription::SubscriptionTrie;

macro_rules! session_not_found {
    ($client_id:expr) => {
        anyhow::bail!("session '{}' not found", $client_id)
    };
}

#[derive(Clone)]
struct Filter {
    subscribe_filter: SubscribeFilter,
    topic_filter: TopicFilter,
    id: Option<usize>,
}

impl Deref for Filter {
    type Target = SubscribeFilter;

    fn deref(&self) -> &Self::Target {
        &self.subscribe_filter
    }
}

struct Session {
    queue: VecDeque<Message>,
    notify: Arc<Notify>,
    last_will: Option<LastWill>,
    session_expiry_interval: u32,
    last_will_expiry_interval: u32,
    inflight_pub_packets: VecDeque<Publish>,
    uncompleted_messages: FnvHashMap<NonZeroU16, Message>,
}

#[derive(Default)]
struct StorageMemoryInner {
    retain_messages: RetainedTrie,

    sessions: HashMap<ByteString, RwLock<Session>>,

    /// Every non-shared subscription, keyed by filter path, so a publish
    /// only has to walk matching trie branches instead of every session.
    subscriptions: SubscriptionTrie<Filter>,

    /// All of the share subscriptions
    ///
    /// share name -> client id -> path -> filter
    share_subscriptions: HashMap<String, HashMap<String, HashMap<ByteString, Filter>>>,

    /// Logical clock of the last delivery to each member of a share group,
    /// used to pick the least-recently-delivered-to member on each publish.
    ///
    /// share name -> client id -> delivery tick.
    share_last_delivered: HashMap<String, HashMap<String, u64>>,
    delivery_clock: u64,
}

impl StorageMemoryInner {
    fn add_share_subscription(&mut self, share_name: &str, client_id: &str, filter: Filter) -> bool {
        self.share_subscriptions
            .entry(share_name.to_string())
            .or_default()
            .entry(client_id.to_string())
            .or_default()
            .insert(filter.path.clone(), filter)
            .is_none()
    }

    fn remove_share_subscription(&mut self, share_name: &str, client_id: &str, path: &str) -> bool {
        let mut res = false;
        if let Some(clients) = self.share_subscriptions.get_mut(share_name) {
            if let Some(filters) = clients.get_mut(client_id) {
                res = filters.remove(path).is_some();
                if filters.is_empty() {
                    clients.remove(client_id);
                }
            }
            if clients.is_empty() {
                self.share_subscriptions.remove(share_name);
            }
        }
        if let Some(ticks) = self.share_last_delivered.get_mut(share_name) {
            ticks.remove(client_id);
        }
        res
    }

    fn remove_all_share_subscriptions(&mut self, client_id: &str) {
        let mut drained_shares = Vec::new();
        for (share_name, clients) in &mut self.share_subscriptions {
            clients.remove(client_id);
            if clients.is_empty() {
                drained_shares.push(share_name.clone());
            }
            if let Some(ticks) = self.share_last_delivered.get_mut(share_name) {
                ticks.remove(client_id);
            }
        }
        for share_name in drained_shares {
            self.share_subscriptions.remove(&share_name);
        }
    }

    /// Pick which member of a share group should receive the next message:
    /// whoever was delivered to longest ago. Members with no delivery
    /// history yet are preferred (tick 0); among those, the choice is
    /// arbitrary, since there's no history to rank them by.
    fn pick_share_target(&mut self, share_name: &str, candidates: &[(String, Message)]) -> usize {
        let ticks = self
            .share_last_delivered
            .entry(share_name.to_string())
            .or_default();
        let mut best_index = 0;
        let mut best_tick = u64::MAX;
        for (index, (client_id, _)) in candidates.iter().enumerate() {
            let tick = ticks.get(client_id.as_str()).copied().unwrap_or(0);
            if tick < best_tick || (tick == best_tick && fastrand::bool()) {
                best_tick = tick;
                best_index = index;
            }
        }
        best_index
    }

    fn record_share_delivery(&mut self, share_name: &str, client_id: &str) {
        self.delivery_clock += 1;
        let tick = self.delivery_clock;
        self.share_last_delivered
            .entry(share_name.to_string())
            .or_default()
            .insert(client_id.to_string(), tick);
    }

    /// Group every filter matching `topic` by client, respecting each
    /// filter's own no-local flag.
    fn match_subscriptions(&self, topic: &Message) -> HashMap<ByteString, Vec<&Filter>> {
        let mut matched: HashMap<ByteString, Vec<&Filter>> = HashMap::new();
        for (client_id, filter) in self.subscriptions.matches(topic.topic()) {
            matched
                .entry(client_id.clone())
                .or_default()
                .push(filter);
        }
        matched
    }
}

#[derive(Default)]
pub struct StorageMemory {
    inner: RwLock<StorageMemoryInner>,
}

#[async_trait::async_trait]
impl Storage for StorageMemory {
    async fn update_retained_message(&self, topic: ByteString, msg: Message) -> Result<()> {
        let mut inner = self.inner.write();
        if msg.is_empty() {
            inner.retain_messages.set(&topic, None);
        } else {
            inner.retain_messages.set(&topic, Some(msg));
        }
        Ok(())
    }

    async fn create_session(
        &self,
        client_id: ByteString,
        clean_start: bool,
        last_will: Option<LastWill>,
        session_expiry_interval: u32,
        last_will_expiry_interval: u32,
    ) -> Result<(bool, Arc<Notify>)> {
        let mut inner = self.inner.write();
        let mut session_present = false;

        if !clean_start {
            if let Some(session) = inner.sessions.get_mut(&client_id) {
                let mut session = session.write();
                session.last_will = last_will.clone();
                session.session_expiry_interval = session_expiry_interval;
                session.last_will_expiry_interval = last_will_expiry_interval;
                session_present = true;
            }
        } else {
            inner.sessions.remove(&client_id);
            inner.subscriptions.remove_all(&client_id);
            inner.remove_all_share_subscriptions(&client_id);
        }

        if !session_present {
            let session = RwLock::new(Session {
                queue: VecDeque::new(),
                notify: Arc::new(Notify::new()),
                last_will,
                session_expiry_interval,
                last_will_expiry_interval,
                inflight_pub_packets: VecDeque::default(),
                uncompleted_messages: FnvHashMap::default(),
            });
            inner.sessions.insert(client_id.clone(), session);
        }

        let notify = inner
            .sessions
            .get(&client_id)
            .unwrap()
            .read()
            .notify
            .clone();
        Ok((session_present, notify))
    }

    async fn remove_session(&self, client_id: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let found = inner.sessions.remove(client_id).is_some();
        inner.subscriptions.remove_all(client_id);
        inner.remove_all_share_subscriptions(client_id);
        Ok(found)
    }

    async fn get_sessions(&self) -> Result<Vec<SessionInfo>> {
        let inner = self.inner.read();
        Ok(inner
            .sessions
            .iter()
            .map(|(client_id, session)| {
                let session = session.read();
                SessionInfo {
                    client_id: client_id.clone(),
                    last_will: session.last_will.clone(),
                    session_expiry_interval: session.session_expiry_interval,
                    last_will_expiry_interval: session.last_will_expiry_interval,
                }
            })
            .collect())
    }

    async fn subscribe(
        &self,
        client_id: &str,
        subscribe_filter: SubscribeFilter,
        topic_filter: TopicFilter,
        id: Option<usize>,
    ) -> Result<()> {
        let filter = Filter {
            subscribe_filter,
            topic_filter,
            id,
        };

        if let Some(share_name) = filter.topic_filter.share_name().map(ToString::to_string) {
            let mut inner = self.inner.write();
            if !inner.sessions.contains_key(client_id) {
                session_not_found!(client_id)
            }

            let is_new_subscribe = inner.add_share_subscription(&share_name, client_id, filter.clone());
            let publish_retain = matches!(
                (filter.retain_handling, is_new_subscribe),
                (RetainHandling::OnEverySubscribe, _) | (RetainHandling::OnNewSubscribe, true)
            );

            if publish_retain && inner.retain_messages.count() > 0 {
                let retained = inner
                    .retain_messages
                    .matches(&filter.path)
                    .filter(|msg| !msg.is_expired())
                    .filter_map(|msg| filter_message(client_id, msg, std::slice::from_ref(&filter)))
                    .collect::<Vec<_>>();

                if !retained.is_empty() {
                    let session = inner.sessions.get(client_id).unwrap();
                    let mut session = session.write();
                    session.queue.extend(retained);
                    session.notify.notify_one();
                    drop(session);
                    inner.record_share_delivery(&share_name, client_id);
                }
            }

            Ok(())
        } else {
            let mut inner = self.inner.write();

            if !inner.sessions.contains_key(client_id) {
                session_not_found!(client_id)
            }

            let is_new_subscribe = inner
                .subscriptions
                .insert(filter.path.clone(), ByteString::from(client_id), filter.clone())
                .is_none();

            let publish_retain = matches!(
                (filter.retain_handling, is_new_subscribe),
                (RetainHandling::OnEverySubscribe, _) | (RetainHandling::OnNewSubscribe, true)
            );

            if publish_retain && inner.retain_messages.count() > 0 {
                let retained = inner
                    .retain_messages
                    .matches(&filter.path)
                    .filter(|msg| !msg.is_expired())
                    .filter_map(|msg| filter_message(client_id, msg, std::slice::from_ref(&filter)))
                    .collect::<Vec<_>>();

                if !retained.is_empty() {
                    let session = inner.sessions.get(client_id).unwrap();
                    let mut session = session.write();
                    session.queue.extend(retained);
                    session.notify.notify_one();
                }
            }

            Ok(())
        }
    }

    async fn unsubscribe(
        &self,
        client_id: &str,
        path: &str,
        topic_filter: TopicFilter,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        if let Some(share_name) = topic_filter.share_name() {
            if !inner.sessions.contains_key(client_id) {
                session_not_found!(client_id)
            }
            Ok(inner.remove_share_subscription(share_name, client_id, path))
        } else {
            if !inner.sessions.contains_key(client_id) {
                session_not_found!(client_id)
            }
            Ok(inner.subscriptions.remove(path, client_id).is_some())
        }
    }

    async fn next_messages(&self, client_id: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        let inner = self.inner.read();

        if let Some(session) = inner.sessions.get(client_id) {
            let session = session.write();
            let mut limit = limit.unwrap_or(usize::MAX);
            let mut res = Vec::new();
            let mut offset = 0;

            if limit == 0 {
                return Ok(Vec::new());
            }

            while let Some(msg) = session.queue.get(offset) {
                offset += 1;

                if msg.is_expired() {
                    continue;
                }

                res.push(msg.clone());
                limit -= 1;
                if limit == 0 {
                    break;
                }
            }

            return Ok(res);
        }

        session_not_found!(client_id)
    }

    async fn consume_messages(&self, client_id: &str, mut count: usize) -> Result<()> {
        let inner = self.inner.read();

        if let Some(session) = inner.sessions.get(client_id) {
            let mut session = session.write();
            while !session.queue.is_empty() && count > 0 {
                session.queue.pop_front();
                count -= 1;
            }
            return Ok(());
        }

        session_not_found!(client_id)
    }

    async fn publish(&self, msgs: Vec<Message>) -> Result<()> {
        if !msgs.is_empty() {
            let mut matched_clients = Vec::new();

            for msg in msgs {
                {
                    let inner = self.inner.read();
                    for (client_id, filters) in inner.match_subscriptions(&msg) {
                        if let Some(msg) = filter_message(&client_id, &msg, filters) {
                            if let Some(session) = inner.sessions.get(&client_id) {
                                let mut session = session.write();
                                session.queue.push_back(msg);
                                session.notify.notify_one();
                            }
                        }
                    }
                }

                let share_names = {
                    let inner = self.inner.read();
                    inner
                        .share_subscriptions
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                };

                for share_name in share_names {
                    matched_clients.clear();
                    {
                        let inner = self.inner.read();
                        let clients = match inner.share_subscriptions.get(&share_name) {
                            Some(clients) => clients,
                            None => continue,
                        };
                        for (client_id, filters) in clients {
                            if let Some(msg) = filter_message(client_id, &msg, filters.values()) {
                                matched_clients.push((client_id.clone(), msg));
                            }
                        }
                    }

                    if matched_clients.is_empty() {
                        continue;
                    }

                    let mut inner = self.inner.write();
                    let index = inner.pick_share_target(&share_name, &matched_clients);
                    let (client_id, msg) = matched_clients.swap_remove(index);

                    if let Some(session) = inner.sessions.get(client_id.as_str()) {
                        let mut session = session.write();
                        session.queue.push_back(msg);
                        session.notify.notify_one();
                    }
                    inner.record_share_delivery(&share_name, &client_id);
                }
            }
        }

        Ok(())
    }

    async fn add_inflight_pub_packet(&self, client_id: &str, publish: Publish) -> Result<()> {
        let inner = self.inner.read();
        if let Some(session) = inner.sessions.get(client_id) {
            let mut session = session.write();
            session.inflight_pub_packets.push_back(publish);
            return Ok(());
        }
        session_not_found!(client_id)
    }

    async fn get_inflight_pub_packets(
        &self,
        client_id: &str,
        packet_id: NonZeroU16,
        remove: bool,
    ) -> Result<Option<Publish>> {
        let inner = self.inner.read();
        if let Some(session) = inner.sessions.get(client_id) {
            return if remove {
                let mut session = session.write();
                if session
                    .inflight_pub_packets
                    .front()
                    .map(|publish| publish.packet_id == Some(packet_id))
                    .unwrap_or_default()
                {
                    Ok(session.inflight_pub_packets.pop_front())
                } else {
                    Ok(None)
                }
            } else {
                let session = session.read();
                Ok(session
                    .inflight_pub_packets
                    .iter()
                    .find(|publish| publish.packet_id == Some(packet_id))
                    .cloned())
            };
        }
        session_not_found!(client_id)
    }

    async fn get_all_inflight_pub_packets(&self, client_id: &str) -> Result<Vec<Publish>> {
        let inner = self.inner.read();
        if let Some(session) = inner.sessions.get(client_id) {
            let session = session.read();
            return Ok(session.inflight_pub_packets.iter().cloned().collect());
        }
        session_not_found!(client_id)
    }

    async fn add_uncompleted_message(
        &self,
        client_id: &str,
        packet_id: NonZeroU16,
        msg: Message,
    ) -> Result<bool> {
        let inner = self.inner.read();
        if let Some(session) = inner.sessions.get(client_id) {
            let mut session = session.write();
            if session.uncompleted_messages.contains_key(&packet_id) {
                return Ok(false);
            }
            session.uncompleted_messages.insert(packet_id, msg);
            return Ok(true);
        }
        session_not_found!(client_id)
    }

    async fn get_uncompleted_message(
        &self,
        client_id: &str,
        packet_id: NonZeroU16,
        remove: bool,
    ) -> Result<Option<Message>> {
        let inner = self.inner.read();
        if let Some(session) = inner.sessions.get(client_id) {
            return if remove {
                let mut session = session.write();
                Ok(session.uncompleted_messages.remove(&packet_id))
            } else {
                let session = session.read();
                Ok(session.uncompleted_messages.get(&packet_id).cloned())
            };
        }
        session_not_found!(client_id)
    }

    async fn metrics(&self) -> Result<StorageMetrics> {
        let inner = self.inner.read();
        Ok(StorageMetrics {
            session_count: inner.sessions.len(),
            inflight_messages_count: inner
                .sessions
                .values()
                .map(|session| session.read().inflight_pub_packets.len())
                .sum::<usize>(),
            retained_messages_count: inner.retain_messages.count(),
            messages_count: inner.retain_messages.count()
                + inner
                    .sessions
                    .values()
                    .map(|session| session.read().queue.len())
                    .sum::<usize>(),
            messages_bytes: inner.retain_messages.bytes()
                + inner
                    .sessions
                    .values()
                    .map(|session| {
                        session
                            .read()
                            .queue
                            .iter()
                            .map(|msg| msg.payload().len())
                            .sum::<usize>()
                    })
                    .sum::<usize>(),
            subscriptions_count: inner
                .share_subscriptions
                .values()
                .flat_map(|clients| clients.values().map(|subscriptions| subscriptions.len()))
                .sum::<usize>()
                + inner.subscriptions.len(),
        })
    }
}

fn filter_message<'a>(
    client_id: &str,
    msg: &Message,
    filters: impl IntoIterator<Item = &'a Filter>,
) -> Option<Message> {
    let mut matched = false;
    let mut max_qos = Qos::AtMostOnce;
    let mut retain = msg.is_retain();
    let mut ids = Vec::new();

    if msg.is_expired() {
        return None;
    }

    for filter in filters {
        if filter.no_local && msg.from_client_id().map(|s| &**s) == Some(client_id) {
            // If no local is true, Application Messages MUST NOT be forwarded to a connection with
            // a ClientID equal to the ClientID of the publishing connection [MQTT-3.8.3-3]
            continue;
        }

        if let Some(id) = filter.id {
            // If the Client specified a Subscription Identifier for any of the overlapping
            // subscriptions the Server MUST send those Subscription Identifiers in the message
            // which is published as the result of the subscriptions [MQTT-3.3.4-3].
            //
            // If the Server sends a single copy of the message it MUST include in the PUBLISH packet
            // the Subscription Identifiers for all matching subscriptions which have a Subscription Identifiers,
            // their order is not significant [MQTT-3.3.4-4].
            ids.push(id);
        }

        // When Clients make subscriptions with Topic Filters that include wildcards, it is possible
        // for a Client’s subscriptions to overlap so that a published message might match multiple filters.
        // In this case the Server MUST deliver the message to the Client respecting the maximum QoS of all
        // the matching subscriptions [MQTT-3.3.4-2].
        max_qos = max_qos.max(filter.qos);

        if !filter.retain_as_published {
            retain = false;
        }

        matched = true;
    }

    if matched {
        let mut properties = msg.properties().clone();
        properties.subscription_identifiers = ids;
        let msg = Message::new(
            msg.topic().clone(),
            msg.qos().min(max_qos),
            msg.payload().clone(),
        )
        .with_properties(properties)
        .with_retain(retain);
        Some(msg)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn msg(topic: &str) -> Message {
        Message::new(ByteString::from(topic), Qos::AtMostOnce, Bytes::new())
    }

    #[test]
    fn pick_share_target_prefers_never_delivered() {
        let mut inner = StorageMemoryInner::default();
        let candidates = vec![("a".to_string(), msg("t")), ("b".to_string(), msg("t"))];

        inner.record_share_delivery("g", "a");
        // "a" has a delivery tick now, "b" has none (tick 0): "b" must win.
        assert_eq!(candidates[inner.pick_share_target("g", &candidates)].0, "b");
    }

    #[test]
    fn pick_share_target_rotates_by_oldest_delivery() {
        let mut inner = StorageMemoryInner::default();
        let candidates = vec![("a".to_string(), msg("t")), ("b".to_string(), msg("t"))];

        inner.record_share_delivery("g", "a");
        inner.record_share_delivery("g", "b");
        // both delivered to once, "a" longer ago: "a" must win next.
        assert_eq!(candidates[inner.pick_share_target("g", &candidates)].0, "a");

        inner.record_share_delivery("g", "a");
        // now "b" was delivered to longer ago.
        assert_eq!(candidates[inner.pick_share_target("g", &candidates)].0, "b");
    }

    #[test]
    fn filter_message_caps_qos_and_clears_retain_unless_requested() {
        let published = Message::new(ByteString::from("a/b"), Qos::ExactlyOnce, Bytes::from("x"))
            .with_retain(true);

        let low_qos = Filter {
            subscribe_filter: SubscribeFilter {
                path: ByteString::from("a/+"),
                qos: Qos::AtLeastOnce,
                no_local: false,
                retain_as_published: false,
                retain_handling: RetainHandling::OnEverySubscribe,
            },
            topic_filter: TopicFilter::try_new("a/+").unwrap(),
            id: None,
        };

        let delivered = filter_message("subscriber", &published, std::slice::from_ref(&low_qos))
            .expect("message matches the filter");
        assert_eq!(delivered.qos(), Qos::AtLeastOnce);
        assert!(!delivered.is_retain());

        let mut keep_retain = low_qos.clone();
        keep_retain.subscribe_filter.retain_as_published = true;
        let delivered =
            filter_message("subscriber", &published, std::slice::from_ref(&keep_retain))
                .expect("message matches the filter");
        assert!(delivered.is_retain());
    }

    #[test]
    fn filter_message_skips_no_local_self_delivery() {
        let published = Message::new(ByteString::from("a/b"), Qos::AtMostOnce, Bytes::new())
            .with_from_client_id("publisher");

        let no_local = Filter {
            subscribe_filter: SubscribeFilter {
                path: ByteString::from("a/b"),
                qos: Qos::AtMostOnce,
                no_local: true,
                retain_as_published: false,
                retain_handling: RetainHandling::OnEverySubscribe,
            },
            topic_filter: TopicFilter::try_new("a/b").unwrap(),
            id: None,
        };

        assert!(filter_message("publisher", &published, std::slice::from_ref(&no_local)).is_none());
        assert!(filter_message("other", &published, std::slice::from_ref(&no_local)).is_some());
    }
}
