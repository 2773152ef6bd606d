//! Generation-checked storage for nodes.
//!
//! Every node lives in a slot of the [`NodeArena`] owned by its simulation.
//! A [`NodeId`] names a slot plus the generation it was issued for, so an id
//! that outlives its node resolves to `None` instead of aliasing whatever
//! reuses the slot.
//!
//! # Ownership
//!
//! Each slot carries a holder count. Every external reference is one holder,
//! and every connected source entry in a consumer's input connection is
//! another. External references are also counted on their own, so releasing
//! one can never consume a hold that belongs to an edge.
//! [`NodeArena::release`] reports when the count reaches zero; the
//! simulation then isolates and frees the node, which in turn releases the
//! node's own producers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::node::{Node, NodeId};

/// Shared handle to a node cell.
pub type NodeCell = Arc<Mutex<Node>>;

struct Entry {
    cell: NodeCell,
    holders: u32,
    // Subset of `holders` taken by external references.
    owners: u32,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Slot storage for all nodes of one simulation.
#[derive(Default)]
pub struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl NodeArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id for a node about to be built.
    ///
    /// The node constructor needs its own id, so allocation is split from
    /// [`insert`](Self::insert).
    pub fn reserve(&mut self) -> NodeId {
        if let Some(index) = self.free.pop() {
            let generation = self.slots[index as usize].generation;
            NodeId::new(index, generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: None,
            });
            NodeId::new(index, 0)
        }
    }

    /// Stores `node` under an id obtained from [`reserve`](Self::reserve),
    /// with one external reference.
    pub fn insert(&mut self, id: NodeId, node: Node) {
        let slot = &mut self.slots[id.index() as usize];
        debug_assert_eq!(slot.generation, id.generation());
        debug_assert!(slot.entry.is_none());
        slot.entry = Some(Entry {
            cell: Arc::new(Mutex::new(node)),
            holders: 1,
            owners: 1,
        });
        self.live += 1;
    }

    fn entry(&self, id: NodeId) -> Option<&Entry> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Resolves an id to its cell, or `None` if the node is gone.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&NodeCell> {
        self.entry(id).map(|e| &e.cell)
    }

    /// Whether `id` still names a live node.
    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    /// Current holder count of a live node.
    pub fn holders(&self, id: NodeId) -> Option<u32> {
        self.entry(id).map(|e| e.holders)
    }

    /// External references still outstanding on a live node.
    pub fn owners(&self, id: NodeId) -> Option<u32> {
        self.entry(id).map(|e| e.owners)
    }

    /// Adds an external reference. Returns `false` if the node is gone.
    pub fn retain_owner(&mut self, id: NodeId) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.owners += 1;
                entry.holders += 1;
                true
            }
            None => false,
        }
    }

    /// Drops an external reference.
    ///
    /// `None` if the node is gone or has no external reference left.
    /// Otherwise `Some(true)` when that was the last holder of any kind.
    pub fn release_owner(&mut self, id: NodeId) -> Option<bool> {
        let entry = self.entry_mut(id)?;
        if entry.owners == 0 {
            return None;
        }
        entry.owners -= 1;
        entry.holders = entry.holders.saturating_sub(1);
        Some(entry.holders == 0)
    }

    /// Adds an edge holder. Returns `false` if the node is gone.
    pub fn retain(&mut self, id: NodeId) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.holders += 1;
                true
            }
            None => false,
        }
    }

    /// Drops an edge holder. Returns `true` when that was the last one and the
    /// caller must now free the node.
    pub fn release(&mut self, id: NodeId) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.holders = entry.holders.saturating_sub(1);
                entry.holders == 0
            }
            None => false,
        }
    }

    /// Takes the node out of its slot and retires the id.
    ///
    /// Outstanding clones of the cell keep the node memory alive but the id
    /// no longer resolves.
    pub fn remove(&mut self, id: NodeId) -> Option<NodeCell> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.live -= 1;
        Some(entry.cell)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the arena holds no live nodes.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Ids of every live node, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry
                .as_ref()
                .map(|_| NodeId::new(i as u32, slot.generation))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::Constant;

    fn add(arena: &mut NodeArena) -> NodeId {
        let id = arena.reserve();
        arena.insert(id, Node::new(id, Box::new(Constant::new(1.0)), 0, 1, 8));
        id
    }

    #[test]
    fn test_stale_id_does_not_resolve() {
        let mut arena = NodeArena::new();
        let a = add(&mut arena);
        assert!(arena.contains(a));
        assert!(arena.remove(a).is_some());
        assert!(!arena.contains(a));

        let b = add(&mut arena);
        assert_eq!(a.index(), b.index(), "slot is reused");
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());
    }

    #[test]
    fn test_holder_counting() {
        let mut arena = NodeArena::new();
        let a = add(&mut arena);
        assert_eq!(arena.holders(a), Some(1));
        assert!(arena.retain(a));
        assert!(!arena.release(a));
        assert!(arena.release(a), "last holder released");
    }

    #[test]
    fn test_owner_release_leaves_edge_holds() {
        let mut arena = NodeArena::new();
        let a = add(&mut arena);
        assert!(arena.retain(a), "edge hold");
        assert_eq!(arena.release_owner(a), Some(false));
        assert_eq!(arena.owners(a), Some(0));
        assert_eq!(arena.release_owner(a), None, "no external reference left");
        assert_eq!(arena.holders(a), Some(1));

        assert!(arena.retain_owner(a));
        assert_eq!(arena.holders(a), Some(2));
        assert_eq!(arena.release_owner(a), Some(false));
        assert!(arena.release(a));
    }

    #[test]
    fn test_ids_and_len() {
        let mut arena = NodeArena::new();
        let a = add(&mut arena);
        let b = add(&mut arena);
        assert_eq!(arena.len(), 2);
        arena.remove(a);
        assert_eq!(arena.ids().collect::<Vec<_>>(), vec![b]);
        assert_eq!(arena.len(), 1);
        assert!(!arena.is_empty());
    }
}
