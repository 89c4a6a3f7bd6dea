//! Identity table: `@id` → object node.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{JsonIoError, Result};
use crate::node::{Document, NodeId};

/// Maps every positive `@id` seen while parsing to the object node that declared it.
///
/// The parser registers a node as soon as it reads its `@id`, before the rest of the object is
/// parsed, so references from inside the object (cycles) and from later siblings (forward
/// references) can both be resolved.
#[derive(Debug, Default, Clone)]
pub struct IdentityTable {
    ids: FxHashMap<i64, NodeId>,
}

impl IdentityTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` under `id`. Ids `<= 0` carry no identity and are ignored.
    pub fn insert(&mut self, id: i64, node: NodeId, max_entries: usize) -> Result<()> {
        if id <= 0 {
            return Ok(());
        }
        if self.ids.len() >= max_entries && !self.ids.contains_key(&id) {
            return Err(JsonIoError::LimitExceeded {
                what: "object references",
                limit: max_entries,
            });
        }
        self.ids.insert(id, node);
        Ok(())
    }

    /// The node registered directly under `id`, without following reference chains.
    pub fn get_raw(&self, id: i64) -> Option<NodeId> {
        self.ids.get(&id).copied()
    }

    /// The node `id` ultimately designates, following chains of nodes that are themselves
    /// references. `Ok(None)` when some id on the chain was never declared.
    pub fn get(&self, id: i64, doc: &Document, max_chain_depth: usize) -> Result<Option<NodeId>> {
        let Some(mut node) = self.get_raw(id) else {
            return Ok(None);
        };
        // Fast path: most lookups don't involve reference chains
        let Some(mut next) = doc.object(node).ref_id else {
            return Ok(Some(node));
        };

        let mut visited = FxHashSet::default();
        visited.insert(id);
        let mut depth = 0usize;
        loop {
            depth += 1;
            if depth > max_chain_depth {
                return Err(JsonIoError::LimitExceeded {
                    what: "reference chain depth",
                    limit: max_chain_depth,
                });
            }
            // A chain that loops back never reaches an object
            if !visited.insert(next) {
                return Err(JsonIoError::DanglingReference { id });
            }
            node = match self.get_raw(next) {
                Some(node) => node,
                None => return Ok(None),
            };
            match doc.object(node).ref_id {
                Some(r) => next = r,
                None => return Ok(Some(node)),
            }
        }
    }

    /// Like [`get`](Self::get) but an undeclared id is a [`JsonIoError::DanglingReference`].
    pub fn get_or_throw(&self, id: i64, doc: &Document, max_chain_depth: usize) -> Result<NodeId> {
        self.get(id, doc, max_chain_depth)?
            .ok_or(JsonIoError::DanglingReference { id })
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// No ids registered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Forget every id.
    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
