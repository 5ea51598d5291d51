//! LRU bookkeeping for the open-file cache
//!
//! A hash map from file number to a node index, and a doubly linked list
//! threaded through a slab of nodes. Move-to-front, insert and eviction are
//! O(1); vacated slab slots are recycled by later inserts.

use std::collections::HashMap;

struct Node<V> {
    key: u64,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

pub(crate) struct LruList<V> {
    map: HashMap<u64, usize>,
    nodes: Vec<Option<Node<V>>>,
    vacant: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
}

impl<V> LruList<V> {
    pub(crate) fn new() -> Self {
        Self {
            map: HashMap::new(),
            nodes: Vec::new(),
            vacant: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Look up `key` and mark it most recently used
    pub(crate) fn touch(&mut self, key: u64) -> Option<&V> {
        let idx = *self.map.get(&key)?;
        self.unlink(idx);
        self.link_front(idx);
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Insert `key` as most recently used; the key must not be present
    pub(crate) fn push_front(&mut self, key: u64, value: V) {
        debug_assert!(!self.map.contains_key(&key));
        let node = Node {
            key,
            value,
            prev: None,
            next: None,
        };
        let idx = match self.vacant.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.link_front(idx);
    }

    /// Remove and return the least recently used entry
    pub(crate) fn pop_back(&mut self) -> Option<(u64, V)> {
        let idx = self.tail?;
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.vacant.push(idx);
        self.map.remove(&node.key);
        Some((node.key, node.value))
    }

    /// Keys from most to least recently used
    pub(crate) fn keys(&self) -> Vec<u64> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match &self.nodes[idx] {
                Some(node) => {
                    keys.push(node.key);
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn link_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.nodes[h].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}
