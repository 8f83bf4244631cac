//! Breakpoint bookkeeping.
//!
//! This module tracks breakpoint ids, states, and hit counts so debugger
//! backends can focus on the platform-specific mechanics (patching memory,
//! stepping over a trap). The backend is responsible for actually installing
//! and restoring traps and reports the results back here.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use crate::types::{Address, SourceLocation};

/// Unique identifier for a breakpoint managed by the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states for a breakpoint entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState
{
    /// Requested but not yet installed.
    Requested,
    /// Installed and will trigger when hit.
    Resolved,
}

impl fmt::Display for BreakpointState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            BreakpointState::Requested => "pending",
            BreakpointState::Resolved => "resolved",
        })
    }
}

/// Public information about a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointInfo
{
    /// Unique identifier for this breakpoint.
    pub id: BreakpointId,
    /// The runtime address of the trap.
    pub address: Address,
    /// Source position the user asked for, when set by `file:line` or name.
    pub location: Option<SourceLocation>,
    /// Current lifecycle state of the breakpoint.
    pub state: BreakpointState,
    /// Number of times this breakpoint has been hit.
    pub hit_count: u64,
    /// Timestamp when the breakpoint was first requested.
    pub requested_at: SystemTime,
    /// Timestamp when the breakpoint was successfully installed, if resolved.
    pub resolved_at: Option<SystemTime>,
}

impl BreakpointInfo
{
    /// Create a new breakpoint info in `Requested` state with zero hit count.
    #[must_use]
    pub fn new(id: BreakpointId, address: Address, location: Option<SourceLocation>) -> Self
    {
        Self {
            id,
            address,
            location,
            state: BreakpointState::Requested,
            hit_count: 0,
            requested_at: SystemTime::now(),
            resolved_at: None,
        }
    }

    /// Whether hitting the trap counts as a stop
    #[must_use]
    pub fn is_enabled(&self) -> bool
    {
        self.state == BreakpointState::Resolved
    }
}

impl fmt::Display for BreakpointInfo
{
    /// `1: where = main.c:25, address = 0x..., resolved, hit count = 1`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}: ", self.id)?;
        if let Some(location) = &self.location {
            write!(f, "where = {location}, ")?;
        }
        write!(
            f,
            "address = {}, {}, hit count = {}",
            self.address, self.state, self.hit_count
        )
    }
}

/// Breakpoint entry tracked by the store.
#[derive(Debug, Clone)]
pub struct BreakpointEntry
{
    /// Public information about the breakpoint.
    pub info: BreakpointInfo,
    /// Instruction bytes replaced by the trap, while installed.
    pub original_bytes: Option<Vec<u8>>,
}

/// Breakpoint store owned by a single debugger backend.
#[derive(Debug, Default)]
pub struct BreakpointStore
{
    next_id: u64,
    by_id: HashMap<BreakpointId, BreakpointEntry>,
    by_address: HashMap<Address, BreakpointId>,
}

impl BreakpointStore
{
    /// Create a new empty breakpoint store.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn allocate_id(&mut self) -> BreakpointId
    {
        self.next_id = self.next_id.wrapping_add(1);
        BreakpointId::from_raw(self.next_id)
    }

    /// Register a breakpoint request at `address`.
    ///
    /// Requesting an address that already has a breakpoint returns the
    /// existing id.
    pub fn request(&mut self, address: Address, location: Option<SourceLocation>) -> BreakpointId
    {
        if let Some(id) = self.by_address.get(&address) {
            return *id;
        }
        let id = self.allocate_id();
        self.by_address.insert(address, id);
        self.by_id.insert(
            id,
            BreakpointEntry {
                info: BreakpointInfo::new(id, address, location),
                original_bytes: None,
            },
        );
        id
    }

    /// Record that the trap for `id` is installed over `original_bytes`.
    pub fn mark_resolved(&mut self, id: BreakpointId, original_bytes: Vec<u8>) -> Option<&BreakpointInfo>
    {
        let entry = self.by_id.get_mut(&id)?;
        entry.info.state = BreakpointState::Resolved;
        entry.info.resolved_at = Some(SystemTime::now());
        entry.original_bytes = Some(original_bytes);
        Some(&entry.info)
    }

    /// Return the identifier of the breakpoint at `address`, if one exists.
    #[must_use]
    pub fn id_at(&self, address: Address) -> Option<BreakpointId>
    {
        self.by_address.get(&address).copied()
    }

    /// Entry of the installed breakpoint at `address`, if any.
    #[must_use]
    pub fn installed_at(&self, address: Address) -> Option<&BreakpointEntry>
    {
        self.id_at(address)
            .and_then(|id| self.by_id.get(&id))
            .filter(|entry| entry.info.is_enabled())
    }

    /// Remove a breakpoint from the store, returning the entry if it was present.
    pub fn remove(&mut self, id: BreakpointId) -> Option<BreakpointEntry>
    {
        let entry = self.by_id.remove(&id)?;
        self.by_address.remove(&entry.info.address);
        Some(entry)
    }

    /// All breakpoints, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<BreakpointInfo>
    {
        let mut infos: Vec<_> = self.by_id.values().map(|entry| entry.info.clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Fetch the public info for a specific breakpoint id.
    #[must_use]
    pub fn info(&self, id: BreakpointId) -> Option<BreakpointInfo>
    {
        self.by_id.get(&id).map(|entry| entry.info.clone())
    }

    /// Record that a breakpoint at the provided address was hit. The entry's hit
    /// counter is incremented only if the breakpoint is currently enabled.
    pub fn record_hit(&mut self, address: Address) -> Option<BreakpointInfo>
    {
        let id = self.id_at(address)?;
        let entry = self.by_id.get_mut(&id)?;
        if !entry.info.is_enabled() {
            return None;
        }
        entry.info.hit_count = entry.info.hit_count.saturating_add(1);
        Some(entry.info.clone())
    }

    /// Drain the store, returning all entries and resetting the internal
    /// bookkeeping maps.
    pub fn drain(&mut self) -> Vec<BreakpointEntry>
    {
        self.by_address.clear();
        self.by_id.drain().map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_request_is_idempotent_per_address()
    {
        let mut store = BreakpointStore::new();
        let first = store.request(Address::new(0x1000), None);
        let again = store.request(Address::new(0x1000), None);
        let other = store.request(Address::new(0x2000), None);
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_hits_only_count_when_resolved()
    {
        let mut store = BreakpointStore::new();
        let id = store.request(Address::new(0x1000), None);
        assert!(store.record_hit(Address::new(0x1000)).is_none());

        store.mark_resolved(id, vec![0x55]);
        let info = store.record_hit(Address::new(0x1000)).unwrap();
        assert_eq!(info.hit_count, 1);
        assert!(store.installed_at(Address::new(0x1000)).is_some());

        assert_eq!(store.info(id).unwrap().hit_count, 1);
        assert!(store.installed_at(Address::new(0x2000)).is_none());
    }

    #[test]
    fn test_display_matches_breakpoint_listing()
    {
        let mut store = BreakpointStore::new();
        let id = store.request(Address::new(0x1139), Some(SourceLocation::new("main.c", 25)));
        store.mark_resolved(id, vec![0x8b]);
        store.record_hit(Address::new(0x1139));
        assert_eq!(
            store.info(id).unwrap().to_string(),
            "1: where = main.c:25, address = 0x0000000000001139, resolved, hit count = 1"
        );
    }

    #[test]
    fn test_remove_forgets_address()
    {
        let mut store = BreakpointStore::new();
        let id = store.request(Address::new(0x1000), None);
        assert!(store.remove(id).is_some());
        assert!(store.id_at(Address::new(0x1000)).is_none());
        assert!(store.drain().is_empty());
    }
}
