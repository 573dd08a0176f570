use crate::error::{OverlayError, Result};
use crate::routing::link::{Link, LinkDescriptor, LinkId};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Index the router-to-router link always occupies
pub const PEER_ROUTER_INDEX: usize = 0;
pub const PEER_ROUTER_LABEL: &str = "peer-router";
pub const NODE_LINK_LABEL: &str = "node-link";

/// One attached link
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    /// Network address of the far end
    pub identity: String,
    pub link: Arc<Link>,
    /// Role of the link, `peer-router` or `node-link`
    pub label: String,
    pub link_id: LinkId,
}

impl RoutingEntry {
    pub fn is_peer_router(&self) -> bool {
        self.label == PEER_ROUTER_LABEL
    }
}

/// Serializable view of one entry for the router console
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub index: usize,
    pub identity: String,
    pub label: String,
    pub link: String,
    pub local: String,
    pub remote: String,
}

#[derive(Default)]
struct TableState {
    entries: BTreeMap<usize, RoutingEntry>,
    next_index: usize,
}

/// Per-router record of attached links.
///
/// Indexes are handed out in increasing order and never reused. Every
/// mutation happens under one mutex; `insert` signals a condition variable so
/// lookups can wait a bounded time for an entry to show up.
pub struct RoutingTable {
    state: Mutex<TableState>,
    inserted: Condvar,
    capacity: Option<usize>,
}

impl RoutingTable {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(TableState::default()),
            inserted: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Routing table lock was poisoned, continuing with its last state");
            poisoned.into_inner()
        })
    }

    /// Record a link at the next index.
    ///
    /// A live entry with the same identity and label is evicted (and its link
    /// closed) first. Fails with `CapacityExceeded`, leaving the table
    /// untouched, when the table already holds `capacity` live entries.
    pub fn insert(&self, identity: &str, link: Arc<Link>, label: &str) -> Result<usize> {
        let mut state = self.lock();

        let stale = state
            .entries
            .iter()
            .find(|(_, e)| e.identity == identity && e.label == label)
            .map(|(index, _)| *index);

        if let Some(capacity) = self.capacity {
            let live_after = state.entries.len() - usize::from(stale.is_some()) + 1;
            if live_after > capacity {
                warn!("Routing table full, rejecting {identity} ({label})");
                return Err(OverlayError::CapacityExceeded { capacity });
            }
        }

        if let Some(index) = stale {
            if let Some(old) = state.entries.remove(&index) {
                warn!(
                    "Replacing stale entry {index} for {identity} ({})",
                    old.link_id
                );
                old.link.close();
            }
        }

        let index = state.next_index;
        state.next_index += 1;
        state.entries.insert(
            index,
            RoutingEntry {
                identity: identity.to_string(),
                link,
                label: label.to_string(),
                link_id: LinkId::new(index),
            },
        );
        drop(state);

        self.inserted.notify_all();
        info!("Routing table: added {identity} at index {index} ({label})");
        Ok(index)
    }

    /// Index of the live entry recorded for `identity`, most recent first
    pub fn find_by_identity(&self, identity: &str) -> Option<usize> {
        self.lock()
            .entries
            .iter()
            .rev()
            .find(|(_, e)| e.identity == identity)
            .map(|(index, _)| *index)
    }

    /// The node entry for `identity`; never matches the peer-router link
    pub fn find_node(&self, identity: &str) -> Option<RoutingEntry> {
        Self::node_in(&self.lock(), identity)
    }

    fn node_in(state: &TableState, identity: &str) -> Option<RoutingEntry> {
        state
            .entries
            .iter()
            .rev()
            .filter(|(index, e)| **index != PEER_ROUTER_INDEX && !e.is_peer_router())
            .find(|(_, e)| e.identity == identity)
            .map(|(_, e)| e.clone())
    }

    /// Like `find_node`, but waits up to `timeout` for the entry to be inserted
    pub fn wait_for_node(&self, identity: &str, timeout: Duration) -> Option<RoutingEntry> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(entry) = Self::node_in(&state, identity) {
                return Some(entry);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.inserted.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn get(&self, index: usize) -> Option<RoutingEntry> {
        self.lock().entries.get(&index).cloned()
    }

    /// The router-to-router link, if one is recorded
    pub fn peer_router(&self) -> Option<RoutingEntry> {
        self.get(PEER_ROUTER_INDEX).filter(|e| e.is_peer_router())
    }

    /// Clear the entry at `index` and close its link
    pub fn remove(&self, index: usize) -> Option<RoutingEntry> {
        let removed = self.lock().entries.remove(&index);
        if let Some(entry) = &removed {
            entry.link.close();
            info!(
                "Routing table: removed {} from index {index}",
                entry.identity
            );
        }
        removed
    }

    pub fn remove_by_link_id(&self, link_id: LinkId) -> Option<RoutingEntry> {
        self.remove(link_id.raw())
    }

    /// Remove the entry whose link matches `descriptor` as seen from either end
    pub fn remove_by_descriptor(&self, descriptor: &LinkDescriptor) -> Option<RoutingEntry> {
        let index = self
            .lock()
            .entries
            .iter()
            .find(|(_, e)| e.link.descriptor().same_link(descriptor))
            .map(|(index, _)| *index)?;
        self.remove(index)
    }

    /// Close every live link, leaving the entries in place. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let state = self.lock();
        for entry in state.entries.values() {
            entry.link.close();
        }
        state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<EntrySummary> {
        self.lock()
            .entries
            .iter()
            .map(|(index, e)| {
                let descriptor = e.link.descriptor();
                EntrySummary {
                    index: *index,
                    identity: e.identity.clone(),
                    label: e.label.clone(),
                    link: e.link_id.to_string(),
                    local: descriptor.local.to_string(),
                    remote: descriptor.remote.to_string(),
                }
            })
            .collect()
    }
}
