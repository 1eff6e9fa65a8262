use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Split;

use crate::message::Message;

/// Trie over literal topic *names* holding at most one retained message per
/// node. Keys never contain wildcards; only lookups (`matches`) do.
#[derive(Default)]
struct Node {
    named_children: HashMap<String, Node>,
    message: Option<Message>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.named_children.is_empty() && self.message.is_none()
    }
}

#[derive(Default)]
pub struct RetainedTrie {
    root: Node,
    count: usize,
    bytes: usize,
}

impl RetainedTrie {
    fn internal_set(
        mut segments: Peekable<Split<char>>,
        parent_node: &mut Node,
        msg: Option<Message>,
    ) -> Option<Message> {
        let segment = segments.next().unwrap();
        let is_end = segments.peek().is_none();
        let deleting = msg.is_none();

        let node = parent_node
            .named_children
            .entry(segment.to_string())
            .or_default();

        let res = if is_end {
            let previous = node.message.take();
            node.message = msg;
            previous
        } else {
            Self::internal_set(segments, node, msg)
        };

        if deleting && node.is_empty() {
            parent_node.named_children.remove(segment);
        }

        res
    }

    /// Empty payload deletes the retained message at that topic (I4).
    pub fn set(&mut self, topic: impl AsRef<str>, msg: Option<Message>) -> Option<Message> {
        let mut segments = topic.as_ref().split('/').peekable();
        assert!(segments.peek().is_some());
        let inserting = msg.is_some();
        let size = msg.as_ref().map(|m| m.payload().len()).unwrap_or_default();
        let previous = Self::internal_set(segments, &mut self.root, msg);
        match (&previous, inserting) {
            (None, true) => {
                self.count += 1;
                self.bytes += size;
            }
            (Some(dropped), false) => {
                self.count -= 1;
                self.bytes -= dropped.payload().len();
            }
            _ => {}
        }
        previous
    }

    fn internal_matches_all<'a>(node: &'a Node, out: &mut Vec<&'a Message>) {
        out.extend(node.message.as_ref());
        for child in node.named_children.values() {
            Self::internal_matches_all(child, out);
        }
    }

    fn internal_matches<'a>(node: &'a Node, out: &mut Vec<&'a Message>, segments: &[&str]) {
        let (segment, tail) = segments.split_first().unwrap();
        let is_end = tail.is_empty();

        match *segment {
            "#" => Self::internal_matches_all(node, out),
            "+" => {
                for child in node.named_children.values() {
                    if is_end {
                        out.extend(child.message.as_ref());
                    } else {
                        Self::internal_matches(child, out, tail);
                    }
                }
            }
            _ => {
                if let Some(child) = node.named_children.get(*segment) {
                    if is_end {
                        out.extend(child.message.as_ref());
                    } else {
                        Self::internal_matches(child, out, tail);
                    }
                }
            }
        }
    }

    /// Retained messages matching a (possibly wildcarded) subscription
    /// filter. A leading `#` or `+` never descends into a top-level topic
    /// whose first segment starts with `$`, matching normal topics only
    /// [MQTT-4.7.2-1].
    pub fn matches(&self, filter: impl AsRef<str>) -> impl Iterator<Item = &Message> {
        let mut out = Vec::new();
        let segments = filter.as_ref().split('/').collect::<Vec<_>>();
        assert!(!segments.is_empty());

        match segments[0] {
            "#" | "+" => {
                for (name, child) in &self.root.named_children {
                    if name.starts_with('$') {
                        continue;
                    }
                    if segments.len() == 1 {
                        out.extend(child.message.as_ref());
                    } else {
                        Self::internal_matches(child, &mut out, &segments[1..]);
                    }
                }
            }
            first => {
                if let Some(child) = self.root.named_children.get(first) {
                    if segments.len() == 1 {
                        out.extend(child.message.as_ref());
                    } else {
                        Self::internal_matches(child, &mut out, &segments[1..]);
                    }
                }
            }
        }

        out.into_iter()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::Qos;

    fn msg(topic: &str) -> Message {
        Message::new(topic, Qos::AtMostOnce, &b"x"[..])
    }

    fn names(trie: &RetainedTrie, filter: &str) -> Vec<String> {
        let mut res: Vec<_> = trie.matches(filter).map(|m| m.topic().to_string()).collect();
        res.sort();
        res
    }

    #[test]
    fn matches_wildcards_and_empty_deletes() {
        let mut trie = RetainedTrie::default();
        trie.set("a/b/c", Some(msg("a/b/c")));
        trie.set("a/k/c", Some(msg("a/k/c")));
        trie.set("a/b", Some(msg("a/b")));
        assert_eq!(trie.count(), 3);

        assert_eq!(names(&trie, "a/#"), vec!["a/b", "a/b/c", "a/k/c"]);
        assert_eq!(names(&trie, "a/+/c"), vec!["a/b/c", "a/k/c"]);

        trie.set("a/b", None);
        assert_eq!(trie.count(), 2);
        assert_eq!(names(&trie, "a/b"), Vec::<String>::new());
    }

    #[test]
    fn top_level_wildcard_skips_dollar_topics() {
        let mut trie = RetainedTrie::default();
        trie.set("$SYS/uptime", Some(msg("$SYS/uptime")));
        trie.set("a", Some(msg("a")));

        assert_eq!(names(&trie, "#"), vec!["a"]);
        assert_eq!(names(&trie, "$SYS/uptime"), vec!["$SYS/uptime"]);
    }
}
