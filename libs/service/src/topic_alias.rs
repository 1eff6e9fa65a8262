use std::num::NonZeroU16;

use bytestring::ByteString;
use fnv::FnvHashMap;

/// Inbound alias table: `alias -> topic`, filled in by the client's own
/// PUBLISH packets. Size-bounded by `topic_alias_maximum` negotiated at
/// CONNECT (I5): callers reject aliases outside `1..=max` before inserting.
#[derive(Default)]
pub struct TopicAliasRecv {
    aliases: FnvHashMap<NonZeroU16, ByteString>,
}

impl TopicAliasRecv {
    /// Insert-or-update on an inbound PUBLISH carrying a non-empty topic and
    /// an alias.
    pub fn insert(&mut self, alias: NonZeroU16, topic: ByteString) {
        self.aliases.insert(alias, topic);
    }

    /// Look up the topic for an inbound PUBLISH that carries an alias but an
    /// empty topic. A miss is a protocol error at the call site.
    pub fn get(&self, alias: NonZeroU16) -> Option<&ByteString> {
        self.aliases.get(&alias)
    }
}

/// Outbound alias table: same mapping, plus an LRU clock per alias and a
/// free-slot tracker so assigning a new alias never needs `O(max)` scans.
pub struct TopicAliasSend {
    max: u16,
    aliases: FnvHashMap<NonZeroU16, (ByteString, u64)>,
    clock: u64,
}

impl TopicAliasSend {
    pub fn new(max: u16) -> Self {
        Self {
            max,
            aliases: FnvHashMap::default(),
            clock: 0,
        }
    }

    /// The smallest alias in `1..=max` not yet assigned, if any.
    pub fn first_vacant(&self) -> Option<NonZeroU16> {
        (1..=self.max).find_map(|n| {
            let alias = NonZeroU16::new(n).unwrap();
            (!self.aliases.contains_key(&alias)).then_some(alias)
        })
    }

    /// Which alias to use for the next assignment: a free slot if one
    /// exists, otherwise the least-recently-used assigned alias.
    pub fn get_lru_alias(&self) -> Option<NonZeroU16> {
        if self.max == 0 {
            return None;
        }
        self.first_vacant().or_else(|| {
            self.aliases
                .iter()
                .min_by_key(|(_, (_, tick))| *tick)
                .map(|(alias, _)| *alias)
        })
    }

    /// The alias already assigned to `topic`, if any; refreshes its LRU tick.
    pub fn find_by_topic(&mut self, topic: &str) -> Option<NonZeroU16> {
        let (alias, entry) = self
            .aliases
            .iter_mut()
            .find(|(_, (assigned_topic, _))| assigned_topic.as_ref() == topic)?;
        self.clock += 1;
        entry.1 = self.clock;
        Some(*alias)
    }

    /// The topic assigned to `alias`, if any; refreshes its LRU tick.
    pub fn find_by_alias(&mut self, alias: NonZeroU16) -> Option<&ByteString> {
        self.clock += 1;
        let tick = self.clock;
        let entry = self.aliases.get_mut(&alias)?;
        entry.1 = tick;
        Some(&entry.0)
    }

    pub fn assign(&mut self, alias: NonZeroU16, topic: ByteString) {
        self.clock += 1;
        self.aliases.insert(alias, (topic, self.clock));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> ByteString {
        ByteString::from(s)
    }

    #[test]
    fn recv_side_round_trips() {
        let mut recv = TopicAliasRecv::default();
        let alias = NonZeroU16::new(1).unwrap();
        recv.insert(alias, topic("a/b"));
        assert_eq!(recv.get(alias).map(|t| t.as_ref()), Some("a/b"));
        assert_eq!(recv.get(NonZeroU16::new(2).unwrap()), None);
    }

    #[test]
    fn send_side_picks_vacant_then_lru() {
        let mut send = TopicAliasSend::new(2);
        assert_eq!(send.first_vacant(), NonZeroU16::new(1));

        let a1 = NonZeroU16::new(1).unwrap();
        let a2 = NonZeroU16::new(2).unwrap();
        send.assign(a1, topic("a"));
        assert_eq!(send.first_vacant(), Some(a2));
        send.assign(a2, topic("b"));
        assert_eq!(send.first_vacant(), None);

        // touching a1 makes a2 the LRU victim
        send.find_by_alias(a1);
        assert_eq!(send.get_lru_alias(), Some(a2));
    }

    #[test]
    fn send_side_reuses_existing_assignment() {
        let mut send = TopicAliasSend::new(4);
        let a1 = NonZeroU16::new(1).unwrap();
        send.assign(a1, topic("a/b"));
        assert_eq!(send.find_by_topic("a/b"), Some(a1));
        assert_eq!(send.find_by_topic("missing"), None);
    }

    #[test]
    fn zero_max_never_assigns() {
        let send = TopicAliasSend::new(0);
        assert_eq!(send.get_lru_alias(), None);
    }
}
