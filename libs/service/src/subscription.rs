use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Split;

use bytestring::ByteString;
use fnv::FnvHashMap;

/// Trie over topic-filter levels, mapping `(topic filter, client id) -> D`.
///
/// Each node only ever holds the data for filters that terminate there;
/// `#` and `+` get their own dedicated child slots so a lookup never has to
/// scan sibling names to find a wildcard.
#[derive(Debug)]
struct Node<D> {
    hash_child: Option<Box<Node<D>>>,
    plus_child: Option<Box<Node<D>>>,
    named_children: FnvHashMap<String, Node<D>>,
    data: HashMap<ByteString, D>,
}

impl<D> Node<D> {
    fn is_empty(&self) -> bool {
        self.hash_child.is_none()
            && self.plus_child.is_none()
            && self.named_children.is_empty()
            && self.data.is_empty()
    }
}

impl<D> Default for Node<D> {
    fn default() -> Self {
        Self {
            hash_child: None,
            plus_child: None,
            named_children: FnvHashMap::default(),
            data: HashMap::new(),
        }
    }
}

pub struct SubscriptionTrie<D> {
    root: Node<D>,
    len: usize,
}

impl<D> Default for SubscriptionTrie<D> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }
}

impl<D> SubscriptionTrie<D> {
    fn internal_insert(
        mut segments: Peekable<Split<char>>,
        parent_node: &mut Node<D>,
        client_id: ByteString,
        data: D,
    ) -> Option<D> {
        let segment = segments.next().unwrap();
        let is_end = segments.peek().is_none();

        let node = match segment {
            "#" => parent_node.hash_child.get_or_insert_with(Box::default),
            "+" => parent_node.plus_child.get_or_insert_with(Box::default),
            _ => parent_node
                .named_children
                .entry(segment.to_string())
                .or_default(),
        };

        if is_end {
            node.data.insert(client_id, data)
        } else {
            Self::internal_insert(segments, node, client_id, data)
        }
    }

    pub fn insert(&mut self, filter: impl AsRef<str>, client_id: ByteString, data: D) -> Option<D> {
        let segments = filter.as_ref().split('/').peekable();
        let res = Self::internal_insert(segments, &mut self.root, client_id, data);
        if res.is_none() {
            self.len += 1;
        }
        res
    }

    fn internal_matches<'a>(
        parent_node: &'a Node<D>,
        nodes: &mut Vec<&'a Node<D>>,
        segments: &[&str],
        is_root: bool,
    ) {
        let (segment, tail) = segments.split_first().unwrap();
        let is_end = tail.is_empty();
        // A leading `#`/`+` never descends into a topic whose first segment
        // starts with `$` [MQTT-4.7.2-1]; deeper wildcards are unrestricted.
        let skip_wildcards = is_root && segment.starts_with('$');

        if !skip_wildcards {
            nodes.extend(parent_node.hash_child.as_deref());
        }

        if is_end {
            if !skip_wildcards {
                nodes.extend(parent_node.plus_child.as_deref());
            }
            nodes.extend(parent_node.named_children.get(*segment));
        } else {
            if !skip_wildcards {
                if let Some(plus_node) = parent_node.plus_child.as_deref() {
                    Self::internal_matches(plus_node, nodes, tail, false);
                }
            }
            if let Some(named_node) = parent_node.named_children.get(*segment) {
                Self::internal_matches(named_node, nodes, tail, false);
            }
        }
    }

    /// All `(client id, data)` pairs whose filter matches `topic`.
    pub fn matches(&self, topic: impl AsRef<str>) -> impl Iterator<Item = (&ByteString, &D)> {
        let mut nodes = Vec::new();
        let segments = topic.as_ref().split('/').collect::<Vec<_>>();
        assert!(!segments.is_empty());
        Self::internal_matches(&self.root, &mut nodes, &segments[..], true);
        nodes.into_iter().flat_map(|node| node.data.iter())
    }

    fn internal_remove(
        mut segments: Peekable<Split<char>>,
        parent_node: &mut Node<D>,
        client_id: &str,
    ) -> Option<D> {
        let segment = segments.next().unwrap();
        let is_end = segments.peek().is_none();

        let node = match segment {
            "#" => parent_node.hash_child.as_deref_mut(),
            "+" => parent_node.plus_child.as_deref_mut(),
            _ => parent_node.named_children.get_mut(segment),
        }?;

        let res = if is_end {
            node.data.remove(client_id)
        } else {
            Self::internal_remove(segments, node, client_id)
        };

        if node.is_empty() {
            match segment {
                "#" => parent_node.hash_child = None,
                "+" => parent_node.plus_child = None,
                _ => {
                    parent_node.named_children.remove(segment);
                }
            }
        }

        res
    }

    pub fn remove(&mut self, filter: impl AsRef<str>, client_id: &str) -> Option<D> {
        let segments = filter.as_ref().split('/').peekable();
        let res = Self::internal_remove(segments, &mut self.root, client_id);
        if res.is_some() {
            self.len -= 1;
        }
        res
    }

    fn internal_remove_all(parent_node: &mut Node<D>, client_id: &str) -> usize {
        let mut removed = 0;

        if parent_node.data.remove(client_id).is_some() {
            removed += 1;
        }

        if let Some(hash_node) = &mut parent_node.hash_child {
            removed += Self::internal_remove_all(hash_node, client_id);
            if hash_node.is_empty() {
                parent_node.hash_child = None;
            }
        }

        if let Some(plus_node) = &mut parent_node.plus_child {
            removed += Self::internal_remove_all(plus_node, client_id);
            if plus_node.is_empty() {
                parent_node.plus_child = None;
            }
        }

        let mut drained = Vec::new();
        for (name, node) in &mut parent_node.named_children {
            removed += Self::internal_remove_all(node, client_id);
            if node.is_empty() {
                drained.push(name.clone());
            }
        }
        for name in drained {
            parent_node.named_children.remove(&name);
        }

        removed
    }

    pub fn remove_all(&mut self, client_id: &str) {
        let removed = Self::internal_remove_all(&mut self.root, client_id);
        self.len -= removed;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> ByteString {
        ByteString::from(s)
    }

    fn do_matches(tree: &SubscriptionTrie<i32>, topic: &str) -> Vec<(ByteString, i32)> {
        let mut res: Vec<_> = tree
            .matches(topic)
            .map(|(client_id, data)| (client_id.clone(), *data))
            .collect();
        res.sort_by(|a, b| a.0.cmp(&b.0));
        res
    }

    #[test]
    fn matches_wildcards() {
        let mut tree = SubscriptionTrie::default();
        tree.insert("a/b/c", cid("1"), 1);
        tree.insert("a/+/c", cid("2"), 1);
        tree.insert("d/+", cid("1"), 2);
        tree.insert("#", cid("3"), 1);
        tree.insert("a/#", cid("4"), 1);

        assert_eq!(tree.len(), 5);
        assert_eq!(
            do_matches(&tree, "a/b/c"),
            vec![(cid("1"), 1), (cid("2"), 1), (cid("3"), 1), (cid("4"), 1)]
        );
        assert_eq!(do_matches(&tree, "d/1"), vec![(cid("1"), 2), (cid("3"), 1)]);
        assert_eq!(do_matches(&tree, "d/1/1"), vec![(cid("3"), 1)]);
    }

    #[test]
    fn top_level_wildcard_skips_dollar_topics() {
        let mut tree = SubscriptionTrie::default();
        tree.insert("#", cid("1"), 1);
        tree.insert("+/uptime", cid("2"), 1);

        assert_eq!(do_matches(&tree, "a"), vec![(cid("1"), 1)]);
        assert_eq!(do_matches(&tree, "$SYS/uptime"), vec![]);
        assert_eq!(do_matches(&tree, "$SYS"), vec![]);
    }

    #[test]
    fn remove_prunes_empty_nodes() {
        let mut tree = SubscriptionTrie::default();
        tree.insert("a/b/c", cid("1"), 1);
        tree.insert("a/b", cid("2"), 1);
        assert_eq!(tree.remove("a/b", "2"), Some(1));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.remove("a/b/c", "1"), Some(1));
        assert_eq!(tree.len(), 0);
        assert!(tree.root.is_empty());
    }

    #[test]
    fn remove_all_drops_every_filter_for_client() {
        let mut tree = SubscriptionTrie::default();
        tree.insert("a/b/c", cid("1"), 1);
        tree.insert("a/+/c", cid("1"), 1);
        tree.insert("d/+", cid("2"), 2);

        tree.remove_all("1");
        assert_eq!(tree.len(), 1);
        tree.remove_all("2");
        assert_eq!(tree.len(), 0);
        assert!(tree.root.is_empty());
    }
}
