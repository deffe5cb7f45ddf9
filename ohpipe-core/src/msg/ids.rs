//! Stream and flush identifiers
//!
//! Stream ids scope every message and control operation to one logical
//! stream. Flush ids number discard barriers. Both are allocated
//! monotonically; flush id 0 is reserved as "no flush".

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

/// Identifier of one logical audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Id carried before any stream has started
    pub const NONE: StreamId = StreamId(0);
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a flush barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlushId(pub u32);

impl FlushId {
    /// Returned by stream handlers that will not flush
    pub const NONE: FlushId = FlushId(0);

    /// Whether this id names a real flush
    pub fn is_valid(&self) -> bool {
        *self != FlushId::NONE
    }
}

impl fmt::Display for FlushId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic stream id allocator
#[derive(Debug)]
pub struct StreamIdProvider {
    next: AtomicU32,
}

impl StreamIdProvider {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next stream id
    pub fn next_stream_id(&self) -> StreamId {
        StreamId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for StreamIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic flush id allocator (never hands out [`FlushId::NONE`])
#[derive(Debug)]
pub struct FlushIdProvider {
    next: AtomicU32,
}

impl FlushIdProvider {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next flush id
    pub fn next_flush_id(&self) -> FlushId {
        FlushId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for FlushIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// A flush that has been promised to a caller but not yet emitted
///
/// Requests arriving before the flush is emitted share its id, so a burst of
/// seeks or stops consumes one id instead of one per request.
#[derive(Debug, Default)]
pub struct PendingFlush {
    id: Mutex<Option<FlushId>>,
}

impl PendingFlush {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pending flush id, allocating one only if none is pending
    pub fn request(&self, provider: &FlushIdProvider) -> FlushId {
        let mut id = self.id.lock().unwrap_or_else(PoisonError::into_inner);
        *id.get_or_insert_with(|| provider.next_flush_id())
    }

    /// Id that would be emitted next, if any
    pub fn pending(&self) -> Option<FlushId> {
        *self.id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the pending flush as serviced and return its id
    pub fn take(&self) -> Option<FlushId> {
        self.id.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_ids_are_monotonic() {
        let provider = StreamIdProvider::new();
        let a = provider.next_stream_id();
        let b = provider.next_stream_id();
        assert!(b > a);
        assert_ne!(a, StreamId::NONE);
    }

    #[test]
    fn test_flush_ids_skip_none() {
        let provider = FlushIdProvider::new();
        assert!(provider.next_flush_id().is_valid());
        assert!(!FlushId::NONE.is_valid());
    }

    #[test]
    fn test_pending_flush_reused_until_taken() {
        let provider = FlushIdProvider::new();
        let pending = PendingFlush::new();

        let first = pending.request(&provider);
        let second = pending.request(&provider);
        assert_eq!(first, second);
        assert_eq!(pending.pending(), Some(first));

        assert_eq!(pending.take(), Some(first));
        assert_eq!(pending.take(), None);

        let third = pending.request(&provider);
        assert_ne!(third, first);
    }
}
