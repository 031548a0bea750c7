//! Packet identifier allocation and tracking.
//!
//! Implements requirements from MQTT spec:
//! - [MQTT-2.3.1-2] Each time a Client sends a new packet it MUST assign a currently unused Packet Identifier.
//! - [MQTT-2.3.1-3] If a Client re-sends a particular Control Packet, then it MUST use the same Packet Identifier.

use ahash::AHashSet;

/// Manages packet identifier allocation.
///
/// Identifiers come from a 16-bit counter that skips 0 and wraps from 65535
/// to 1. An identifier owned by an in-flight request is never handed out
/// again until that request releases it.
#[derive(Debug)]
pub(crate) struct PacketIdAllocator {
    /// Next ID to try allocating
    next_id: u16,
    /// Set of currently in-use IDs
    in_use: AHashSet<u16>,
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            in_use: AHashSet::new(),
        }
    }

    /// Allocate a new unused packet identifier.
    ///
    /// Returns `None` if all 65535 possible IDs are in use.
    pub fn allocate(&mut self) -> Option<u16> {
        let start = self.next_id;
        loop {
            let id = self.next_id;
            self.advance_next();
            if self.in_use.insert(id) {
                return Some(id);
            }
            if self.next_id == start {
                // Wrapped around completely, all IDs in use
                return None;
            }
        }
    }

    /// Release a packet identifier after its request reaches a terminal state.
    pub fn release(&mut self, id: u16) {
        self.in_use.remove(&id);
    }

    #[cfg(test)]
    pub fn is_in_use(&self, id: u16) -> bool {
        self.in_use.contains(&id)
    }

    #[cfg(test)]
    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Clear all allocations.
    pub fn clear(&mut self) {
        self.in_use.clear();
        self.next_id = 1;
    }

    /// Advance next_id, skipping 0.
    fn advance_next(&mut self) {
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation() {
        let mut alloc = PacketIdAllocator::new();
        assert_eq!(alloc.allocate(), Some(1));
        assert_eq!(alloc.allocate(), Some(2));
        assert_eq!(alloc.allocate(), Some(3));
    }

    #[test]
    fn test_release_and_reuse() {
        let mut alloc = PacketIdAllocator::new();
        let id1 = alloc.allocate().unwrap();
        let id2 = alloc.allocate().unwrap();

        assert!(alloc.is_in_use(id1));
        assert!(alloc.is_in_use(id2));

        alloc.release(id1);
        assert!(!alloc.is_in_use(id1));
        assert!(alloc.is_in_use(id2));
    }

    #[test]
    fn test_skips_zero() {
        let mut alloc = PacketIdAllocator::new();
        alloc.next_id = 65535;
        assert_eq!(alloc.allocate(), Some(65535));
        assert_eq!(alloc.allocate(), Some(1)); // Skipped 0
    }

    #[test]
    fn test_skips_ids_still_in_use() {
        let mut alloc = PacketIdAllocator::new();
        alloc.next_id = 65535;
        assert_eq!(alloc.allocate(), Some(65535));
        // 1 is still owned from an earlier wrap
        alloc.in_use.insert(1);
        assert_eq!(alloc.allocate(), Some(2));
    }

    #[test]
    fn test_exhaustion() {
        let mut alloc = PacketIdAllocator::new();
        for _ in 0..65535 {
            assert!(alloc.allocate().is_some());
        }
        assert_eq!(alloc.allocate(), None);
        alloc.release(300);
        assert_eq!(alloc.allocate(), Some(300));
    }

    #[test]
    fn test_clear() {
        let mut alloc = PacketIdAllocator::new();
        alloc.allocate();
        alloc.allocate();
        assert_eq!(alloc.in_use_count(), 2);

        alloc.clear();
        assert_eq!(alloc.in_use_count(), 0);
        assert_eq!(alloc.allocate(), Some(1));
    }
}
