//! Byte-keyed prefix index.
//!
//! A 256-way trie stored in an arena. Each node owns a count of keys ending exactly at it and an
//! optional value; children are addressed directly by the next key byte, so lookups cost one step
//! per key byte regardless of how many keys are stored. Child tables are allocated on first use.
//!
//! Handles ([`NodeId`]) carry the generation of the arena they were issued from. After
//! [`PrefixIndex::clear_with`] every old handle is stale and resolves to nothing.

const RADIX: usize = 256;
const NO_CHILD: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

struct Node<V> {
    count: u32,
    parent: Option<u32>,
    // Index 0 is always the root and never a child, so 0 marks an empty slot.
    children: Option<Box<[u32; RADIX]>>,
    value: Option<V>,
}

impl<V> Node<V> {
    fn new(parent: Option<u32>) -> Self {
        Self { count: 0, parent, children: None, value: None }
    }

    fn child(&self, byte: u8) -> Option<u32> {
        self.children
            .as_ref()
            .map(|c| c[usize::from(byte)])
            .filter(|&idx| idx != NO_CHILD)
    }
}

pub struct PrefixIndex<V> {
    nodes: Vec<Node<V>>,
    generation: u32,
    keys: usize,
}

impl<V> Default for PrefixIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PrefixIndex<V> {
    pub fn new() -> Self {
        Self { nodes: vec![Node::new(None)], generation: 0, keys: 0 }
    }

    /// Walks the key, creating missing nodes, and bumps the terminal node's count.
    pub fn insert(&mut self, key: &[u8]) -> NodeId {
        let mut cur = 0u32;
        for &byte in key {
            cur = match self.nodes[cur as usize].child(byte) {
                Some(next) => next,
                None => self.add_child(cur, byte),
            };
        }
        let node = &mut self.nodes[cur as usize];
        if node.count == 0 {
            self.keys += 1;
        }
        node.count = node.count.saturating_add(1);
        self.handle(cur)
    }

    /// Walks the key without creating anything. A node found with a zero count is only a
    /// prefix of other keys; use [`PrefixIndex::contains`] for exact membership.
    pub fn find(&self, key: &[u8]) -> Option<NodeId> {
        let mut cur = 0u32;
        for &byte in key {
            cur = self.nodes[cur as usize].child(byte)?;
        }
        Some(self.handle(cur))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.find(key).map_or(false, |id| self.count(id) > 0)
    }

    /// Value attached to the node for `key`, if the key was inserted.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let id = self.find(key)?;
        if self.count(id) == 0 {
            return None;
        }
        self.value(id)
    }

    pub fn count(&self, id: NodeId) -> u32 {
        self.node(id).map_or(0, |n| n.count)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.node(id)?.parent?;
        Some(self.handle(parent))
    }

    pub fn value(&self, id: NodeId) -> Option<&V> {
        self.node(id)?.value.as_ref()
    }

    pub fn value_mut(&mut self, id: NodeId) -> Option<&mut V> {
        self.node_mut(id)?.value.as_mut()
    }

    /// Attaches `value`, returning whatever was attached before. Stale handles are ignored and
    /// hand the value back.
    pub fn set_value(&mut self, id: NodeId, value: V) -> Result<Option<V>, V> {
        match self.node_mut(id) {
            Some(node) => Ok(node.value.replace(value)),
            None => Err(value),
        }
    }

    /// Mutable access to the attached value, creating it with `init` when absent.
    pub fn value_or_insert_with(&mut self, id: NodeId, init: impl FnOnce() -> V) -> Option<&mut V> {
        Some(self.node_mut(id)?.value.get_or_insert_with(init))
    }

    /// Number of distinct keys inserted.
    pub fn len(&self) -> usize {
        self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Releases every node, handing each attached value to `destroy` exactly once. Values are
    /// released post-order: all of a node's descendants before the node itself.
    pub fn clear_with(&mut self, mut destroy: impl FnMut(V)) {
        let mut nodes = std::mem::take(&mut self.nodes);
        // (node, children already pushed)
        let mut stack = vec![(0u32, false)];
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                if let Some(value) = nodes[idx as usize].value.take() {
                    destroy(value);
                }
                continue;
            }
            stack.push((idx, true));
            if let Some(children) = nodes[idx as usize].children.as_ref() {
                for &child in children.iter().rev().filter(|&&c| c != NO_CHILD) {
                    stack.push((child, false));
                }
            }
        }
        drop(nodes);

        self.nodes = vec![Node::new(None)];
        self.keys = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn clear(&mut self) {
        self.clear_with(drop);
    }

    fn add_child(&mut self, parent: u32, byte: u8) -> u32 {
        let idx = u32::try_from(self.nodes.len()).expect("prefix index exceeds u32 node ids");
        self.nodes.push(Node::new(Some(parent)));
        let children = self.nodes[parent as usize]
            .children
            .get_or_insert_with(|| Box::new([NO_CHILD; RADIX]));
        children[usize::from(byte)] = idx;
        idx
    }

    fn handle(&self, index: u32) -> NodeId {
        NodeId { index, generation: self.generation }
    }

    fn node(&self, id: NodeId) -> Option<&Node<V>> {
        if id.generation != self.generation {
            return None;
        }
        self.nodes.get(id.index as usize)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<V>> {
        if id.generation != self.generation {
            return None;
        }
        self.nodes.get_mut(id.index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_find() {
        let mut idx: PrefixIndex<&str> = PrefixIndex::new();
        let id = idx.insert(b"abc");
        idx.set_value(id, "x").unwrap();
        assert_eq!(idx.find(b"abc"), Some(id));
        assert_eq!(idx.get(b"abc"), Some(&"x"));
        assert_eq!(idx.count(id), 1);
        assert!(idx.find(b"abd").is_none());
    }

    #[test]
    fn prefix_only_node_has_zero_count() {
        let mut idx: PrefixIndex<()> = PrefixIndex::new();
        idx.insert(b"example");
        let prefix = idx.find(b"exam").expect("prefix path exists");
        assert_eq!(idx.count(prefix), 0);
        assert!(!idx.contains(b"exam"));
        assert!(idx.contains(b"example"));
    }

    #[test]
    fn repeated_insert_counts_up_but_is_one_key() {
        let mut idx: PrefixIndex<()> = PrefixIndex::new();
        let a = idx.insert(b"k");
        let b = idx.insert(b"k");
        assert_eq!(a, b);
        assert_eq!(idx.count(a), 2);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn empty_key_lives_at_root() {
        let mut idx: PrefixIndex<u8> = PrefixIndex::new();
        let root = idx.insert(b"");
        assert!(idx.parent(root).is_none());
        assert!(idx.contains(b""));
    }

    #[test]
    fn parent_walks_back_one_byte() {
        let mut idx: PrefixIndex<()> = PrefixIndex::new();
        let leaf = idx.insert(b"ab");
        let parent = idx.parent(leaf).unwrap();
        assert_eq!(Some(parent), idx.find(b"a"));
    }

    #[test]
    fn value_or_insert_with_appends_in_place() {
        let mut idx: PrefixIndex<Vec<u32>> = PrefixIndex::new();
        for n in 0..3 {
            let id = idx.insert(b"list");
            idx.value_or_insert_with(id, Vec::new).unwrap().push(n);
        }
        assert_eq!(idx.get(b"list"), Some(&vec![0, 1, 2]));
    }

    #[test]
    fn clear_destroys_each_value_once_children_first() {
        let mut idx: PrefixIndex<String> = PrefixIndex::new();
        for key in ["a", "ab", "abc", "b"] {
            let id = idx.insert(key.as_bytes());
            idx.set_value(id, key.to_string()).unwrap();
        }
        let mut order = Vec::new();
        idx.clear_with(|v| order.push(v));

        assert_eq!(order.len(), 4);
        let pos = |k: &str| order.iter().position(|v| v == k).unwrap();
        assert!(pos("abc") < pos("ab"));
        assert!(pos("ab") < pos("a"));
        assert!(idx.is_empty());
        assert_eq!(idx.node_count(), 1);
    }

    #[test]
    fn handles_go_stale_after_clear() {
        let mut idx: PrefixIndex<u8> = PrefixIndex::new();
        let old = idx.insert(b"x");
        idx.clear();
        let fresh = idx.insert(b"x");
        assert_ne!(old, fresh);
        assert_eq!(idx.count(old), 0);
        assert_eq!(idx.set_value(old, 1), Err(1));
        assert_eq!(idx.set_value(fresh, 2), Ok(None));
    }
}
