//! Prefix Index: a binary bit-trie keyed by the canonical binary form of
//! an address, used for O(address-bit-length) ban membership tests with
//! no hashing and no allocation on the lookup hot path. Walked 8 bits
//! per octet, MSB-first.
//!
//! A plain compressed bitmap plus CIDR list is a fine choice for a
//! static deny set, but doesn't give a terminal a place to carry a
//! mutable `banned` flag that a stale read can repair in place — hence
//! a from-scratch trie rather than a borrowed bitmap structure.

/// One node of the trie. `children[0]`/`children[1]` are the bit-0/bit-1
/// branches; `terminal` marks "an address's full binary form ends here";
/// `banned` is repaired lazily by a lookup that finds it stale.
#[derive(Debug, Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    terminal: bool,
    banned: bool,
    address: Option<String>,
}

/// The bit-trie itself. Not pruned on delete: a cleared terminal stays in
/// the tree so re-insertion is cheap and so `radix_stats` reflects total
/// nodes ever created.
#[derive(Debug, Default)]
pub struct PrefixIndex {
    root: Node,
}

impl PrefixIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the address's binary form, marking the terminal node
    /// banned. No-op (returns false) for an empty octet slice.
    pub fn insert(&mut self, octets: &[u8], canonical: &str) -> bool {
        if octets.is_empty() {
            return false;
        }
        let mut node = &mut self.root;
        for &byte in octets {
            for bit_index in (0..8).rev() {
                let bit = ((byte >> bit_index) & 1) as usize;
                node = node.children[bit].get_or_insert_with(|| Box::new(Node::default()));
            }
        }
        node.terminal = true;
        node.banned = true;
        node.address = Some(canonical.to_string());
        true
    }

    /// True iff the address's binary form walks to an existing terminal
    /// node with `banned=true`.
    pub fn search(&self, octets: &[u8]) -> bool {
        if octets.is_empty() {
            return false;
        }
        match self.find(octets) {
            Some(node) => node.terminal && node.banned,
            None => false,
        }
    }

    /// Clear the `banned` flag at the address's terminal node, if it
    /// exists. The node itself is left in place. Returns whether
    /// anything changed.
    pub fn delete(&mut self, octets: &[u8]) -> bool {
        if octets.is_empty() {
            return false;
        }
        match self.find_mut(octets) {
            Some(node) if node.terminal && node.banned => {
                node.banned = false;
                true
            }
            _ => false,
        }
    }

    fn find(&self, octets: &[u8]) -> Option<&Node> {
        let mut node = &self.root;
        for &byte in octets {
            for bit_index in (0..8).rev() {
                let bit = ((byte >> bit_index) & 1) as usize;
                node = node.children[bit].as_deref()?;
            }
        }
        Some(node)
    }

    fn find_mut(&mut self, octets: &[u8]) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for &byte in octets {
            for bit_index in (0..8).rev() {
                let bit = ((byte >> bit_index) & 1) as usize;
                node = node.children[bit].as_deref_mut()?;
            }
        }
        Some(node)
    }

    /// Depth-first count of every node in the tree, including the root.
    pub fn node_count(&self) -> usize {
        fn count(node: &Node) -> usize {
            1 + node
                .children
                .iter()
                .filter_map(|c| c.as_deref())
                .map(count)
                .sum::<usize>()
        }
        count(&self.root)
    }

    /// Count of terminal nodes currently banned.
    pub fn currently_banned_count(&self) -> usize {
        fn count(node: &Node) -> usize {
            let mut total = if node.terminal && node.banned { 1 } else { 0 };
            for child in node.children.iter().filter_map(|c| c.as_deref()) {
                total += count(child);
            }
            total
        }
        count(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_search() {
        let mut trie = PrefixIndex::new();
        let octets = [192, 168, 1, 200];
        assert!(!trie.search(&octets));
        trie.insert(&octets, "192.168.1.200");
        assert!(trie.search(&octets));
    }

    #[test]
    fn insert_then_delete_then_search() {
        let mut trie = PrefixIndex::new();
        let octets = [10, 0, 0, 1];
        trie.insert(&octets, "10.0.0.1");
        assert!(trie.search(&octets));
        assert!(trie.delete(&octets));
        assert!(!trie.search(&octets));
    }

    #[test]
    fn search_for_unrelated_address_is_false() {
        let mut trie = PrefixIndex::new();
        trie.insert(&[1, 2, 3, 4], "1.2.3.4");
        assert!(!trie.search(&[5, 6, 7, 8]));
    }

    #[test]
    fn malformed_empty_octets_are_no_ops() {
        let mut trie = PrefixIndex::new();
        assert!(!trie.insert(&[], "bogus"));
        assert!(!trie.search(&[]));
        assert!(!trie.delete(&[]));
    }

    #[test]
    fn delete_does_not_prune_the_node() {
        let mut trie = PrefixIndex::new();
        let octets = [8, 8, 8, 8];
        trie.insert(&octets, "8.8.8.8");
        let before = trie.node_count();
        trie.delete(&octets);
        assert_eq!(trie.node_count(), before);
        trie.insert(&octets, "8.8.8.8");
        assert!(trie.search(&octets));
    }

    #[test]
    fn v4_and_v6_coexist_without_collision() {
        let mut trie = PrefixIndex::new();
        trie.insert(&[1, 1, 1, 1], "1.1.1.1");
        let v6_octets: [u8; 16] = [0; 16];
        trie.insert(&v6_octets, "::");
        assert!(trie.search(&[1, 1, 1, 1]));
        assert!(trie.search(&v6_octets));
    }

    #[test]
    fn currently_banned_count_reflects_deletes() {
        let mut trie = PrefixIndex::new();
        trie.insert(&[1, 1, 1, 1], "1.1.1.1");
        trie.insert(&[2, 2, 2, 2], "2.2.2.2");
        assert_eq!(trie.currently_banned_count(), 2);
        trie.delete(&[1, 1, 1, 1]);
        assert_eq!(trie.currently_banned_count(), 1);
    }
}
