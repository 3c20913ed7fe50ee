use std::collections::HashSet;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::document::{Document, ElementNode};

pub const ID_LENGTH: usize = 7;

/// Issues Elementor-style 7 hex digit element ids that never collide with ids already
/// present in the documents it was told about.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    seed: u64,
    counter: u64,
    taken: HashSet<String>,
}

impl IdGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: 0,
            taken: HashSet::new(),
        }
    }

    pub fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos() as u64)
            .unwrap_or(0);
        Self::new(nanos ^ (u64::from(process::id()) << 32))
    }

    pub fn reserve(&mut self, id: &str) {
        if !id.is_empty() {
            self.taken.insert(id.to_string());
        }
    }

    pub fn reserve_document(&mut self, document: &Document) {
        for node in &document.elements {
            self.reserve_node(node);
        }
    }

    fn reserve_node(&mut self, node: &ElementNode) {
        self.reserve(&node.id);
        for child in &node.elements {
            self.reserve_node(child);
        }
    }

    pub fn next_id(&mut self) -> String {
        loop {
            self.counter += 1;
            let mut hasher = Sha256::new();
            hasher.update(self.seed.to_le_bytes());
            hasher.update(self.counter.to_le_bytes());
            let digest = hasher.finalize();
            let mut id = String::with_capacity(ID_LENGTH + 1);
            for byte in digest.iter().take(ID_LENGTH.div_ceil(2)) {
                id.push_str(&format!("{byte:02x}"));
            }
            id.truncate(ID_LENGTH);
            if self.taken.insert(id.clone()) {
                return id;
            }
        }
    }
}

pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|ch| ch.is_ascii_alphanumeric())
}

/// Give every node in `nodes` a fresh id from `ids`.
pub fn regenerate_ids(nodes: &mut [ElementNode], ids: &mut IdGenerator) {
    for node in nodes {
        node.id = ids.next_id();
        regenerate_ids(&mut node.elements, ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ElementKind;

    #[test]
    fn ids_are_seven_hex_digits() {
        let mut ids = IdGenerator::new(7);
        let id = ids.next_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert!(is_valid_id(&id));
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let mut left = IdGenerator::new(42);
        let mut right = IdGenerator::new(42);
        for _ in 0..5 {
            assert_eq!(left.next_id(), right.next_id());
        }
    }

    #[test]
    fn reserved_ids_are_never_issued() {
        let mut probe = IdGenerator::new(1);
        let first = probe.next_id();

        let mut ids = IdGenerator::new(1);
        ids.reserve(&first);
        assert_ne!(ids.next_id(), first);
    }

    #[test]
    fn thousand_ids_are_unique() {
        let mut ids = IdGenerator::new(3);
        let issued: HashSet<String> = (0..1000).map(|_| ids.next_id()).collect();
        assert_eq!(issued.len(), 1000);
    }

    #[test]
    fn regenerate_replaces_nested_ids() {
        let mut child = ElementNode::new("same", ElementKind::Column);
        child.elements.push(ElementNode::new("same", ElementKind::Widget));
        let mut root = ElementNode::new("same", ElementKind::Section);
        root.elements.push(child);

        let mut nodes = vec![root];
        regenerate_ids(&mut nodes, &mut IdGenerator::new(9));
        let a = &nodes[0].id;
        let b = &nodes[0].elements[0].id;
        let c = &nodes[0].elements[0].elements[0].id;
        assert!(a != b && b != c && a != c);
    }

    #[test]
    fn invalid_ids() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("ab c"));
        assert!(!is_valid_id("a\"b"));
    }
}
