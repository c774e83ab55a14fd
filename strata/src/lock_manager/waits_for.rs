//! Waits-for graph snapshots and cycle search.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::TransactionId;

/// Directed graph with an edge from every blocked transaction to every
/// transaction holding a lock it conflicts with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitsForGraph {
    edges: BTreeMap<TransactionId, BTreeSet<TransactionId>>,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, waiter: TransactionId, holder: TransactionId) {
        self.edges.entry(waiter).or_default().insert(holder);
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Transactions `waiter` is blocked on.
    pub fn waits_on(&self, waiter: TransactionId) -> impl Iterator<Item = TransactionId> + '_ {
        self.edges.get(&waiter).into_iter().flatten().copied()
    }

    /// Every blocked transaction.
    pub fn waiters(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.edges.keys().copied()
    }

    /// A cycle passing through `start`, as the path `start -> ... -> start`
    /// without the repeated final node.
    pub fn find_cycle(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        let mut visited = HashSet::new();
        let mut path = vec![start];
        if self.cycle_util(start, start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    /// Whether the graph contains any cycle at all.
    pub fn has_cycle(&self) -> bool {
        self.waiters().any(|tx_id| self.find_cycle(tx_id).is_some())
    }

    fn cycle_util(
        &self,
        start: TransactionId,
        tx_id: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut Vec<TransactionId>,
    ) -> bool {
        if !visited.insert(tx_id) {
            return false;
        }
        for next in self.waits_on(tx_id) {
            if next == start {
                return true;
            }
            path.push(next);
            if self.cycle_util(start, next, visited, path) {
                return true;
            }
            path.pop();
        }
        false
    }
}
