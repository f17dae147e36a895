//! Fixed-capacity connection pool.
//!
//! Slots live in an arena (`Vec<Slot>`) and the free list is a stack of
//! indices into it, so reuse never touches a dangling pointer. A slot is
//! either `Free` (present on the free stack) or `Active` (owning a stream);
//! the active count is derived from the free stack's length rather than
//! tracked separately, so the two can never disagree.
//!
//! The pool is strictly single-threaded: one reactor thread allocates,
//! releases, and sweeps.

use std::time::{Duration, Instant};

use mio::net::TcpStream;
use tracing::debug;

/// Lifecycle state of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// On the free stack, no descriptor.
    Free,
    /// Allocated to an accepted client.
    Active,
}

/// One reusable connection slot.
#[derive(Debug)]
pub struct Slot {
    state: SlotState,
    stream: Option<TcpStream>,
    created_at: Instant,
    last_active: Instant,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Self {
            state: SlotState::Free,
            stream: None,
            created_at: now,
            last_active: now,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// The slot's stream, present iff the slot is active.
    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    /// Attaches the accepted stream to a freshly acquired slot.
    pub fn attach(&mut self, stream: TcpStream) {
        debug_assert_eq!(self.state, SlotState::Active);
        self.stream = Some(stream);
    }

    /// Updates the last-activity timestamp.
    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }

    fn is_expired(&self, now: Instant, idle_timeout: Duration, max_age: Duration) -> bool {
        now.duration_since(self.last_active) > idle_timeout
            || now.duration_since(self.created_at) > max_age
    }
}

/// Fixed-capacity pool of connection slots with an index free-list stack.
#[derive(Debug)]
pub struct ConnectionPool {
    slots: Vec<Slot>,
    /// Free slot indices; the top of the stack is the next slot handed out.
    free: Vec<usize>,
    idle_timeout: Duration,
    max_age: Duration,
}

impl ConnectionPool {
    /// Creates a pool of `capacity` slots, all free.
    ///
    /// The free stack is seeded so that the first acquisition hands out
    /// slot 0, matching array order.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize, idle_timeout: Duration, max_age: Duration) -> Self {
        assert!(capacity > 0, "pool capacity must be positive");

        let now = Instant::now();
        let slots = (0..capacity).map(|_| Slot::new(now)).collect();
        let free = (0..capacity).rev().collect();

        Self {
            slots,
            free,
            idle_timeout,
            max_age,
        }
    }

    /// Pool capacity, immutable after construction.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of active connections, derived from the free stack.
    pub fn active_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns true if no slot is available.
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// Pops a free slot and marks it active, stamping both timestamps.
    ///
    /// Returns `None` when the pool is exhausted; the caller is expected to
    /// degrade service (503) rather than queue.
    pub fn acquire(&mut self, now: Instant) -> Option<usize> {
        let idx = self.free.pop()?;
        let slot = &mut self.slots[idx];
        slot.state = SlotState::Active;
        slot.created_at = now;
        slot.last_active = now;
        Some(idx)
    }

    /// Shared access to a slot.
    pub fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx]
    }

    /// Exclusive access to a slot.
    pub fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        &mut self.slots[idx]
    }

    /// Returns an active slot to the free stack and hands back its stream.
    ///
    /// Closing the descriptor and deregistering it from the multiplexer are
    /// the caller's responsibility. Releasing a slot that is not active is
    /// rejected (`None`), so a double release cannot corrupt the free
    /// stack.
    pub fn release(&mut self, idx: usize) -> Option<TcpStream> {
        let slot = &mut self.slots[idx];
        if slot.state != SlotState::Active {
            debug!(slot = idx, "release of non-active slot ignored");
            return None;
        }
        slot.state = SlotState::Free;
        slot.last_active = Instant::now();
        let stream = slot.stream.take();
        self.free.push(idx);
        stream
    }

    /// Indices of active slots past the idle timeout or maximum age.
    ///
    /// Called once per reactor iteration; the reactor shuts down,
    /// deregisters, and releases each expired slot. Worst-case staleness is
    /// therefore bounded by the poll interval.
    pub fn expired(&self, now: Instant) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.state == SlotState::Active
                    && slot.is_expired(now, self.idle_timeout, self.max_age)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Indices of all active slots.
    pub fn active_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Active)
            .map(|(idx, _)| idx)
            .collect()
    }
}

// Dropping the pool drops every still-held stream, closing the descriptors.

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize) -> ConnectionPool {
        ConnectionPool::new(capacity, Duration::from_secs(60), Duration::from_secs(300))
    }

    #[test]
    fn acquire_hands_out_slots_in_array_order() {
        let mut pool = pool(3);
        let now = Instant::now();
        assert_eq!(pool.acquire(now), Some(0));
        assert_eq!(pool.acquire(now), Some(1));
        assert_eq!(pool.acquire(now), Some(2));
    }

    #[test]
    fn acquire_fails_when_exhausted() {
        let mut pool = pool(2);
        let now = Instant::now();
        assert!(pool.acquire(now).is_some());
        assert!(pool.acquire(now).is_some());
        assert_eq!(pool.acquire(now), None, "third acquire must be refused");
        assert!(pool.is_exhausted());
    }

    #[test]
    fn active_count_is_derived_from_free_stack() {
        let mut pool = pool(4);
        let now = Instant::now();
        assert_eq!(pool.active_count(), 0);

        let a = pool.acquire(now).unwrap();
        let _b = pool.acquire(now).unwrap();
        assert_eq!(pool.active_count(), 2);

        pool.release(a);
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn release_returns_slot_for_reuse() {
        let mut pool = pool(1);
        let now = Instant::now();
        let idx = pool.acquire(now).unwrap();
        assert_eq!(pool.acquire(now), None);

        pool.release(idx);
        assert_eq!(pool.acquire(now), Some(idx), "released slot is reusable");
    }

    #[test]
    fn double_release_is_rejected() {
        let mut pool = pool(2);
        let now = Instant::now();
        let idx = pool.acquire(now).unwrap();

        pool.release(idx);
        assert!(pool.release(idx).is_none(), "second release must be a no-op");

        // The free stack must not contain the index twice.
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.acquire(now), Some(idx));
        assert_ne!(pool.acquire(now), Some(idx));
    }

    #[test]
    fn release_of_never_acquired_slot_is_rejected() {
        let mut pool = pool(2);
        assert!(pool.release(1).is_none());
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn freshly_acquired_slot_is_active_with_no_stream() {
        let mut pool = pool(1);
        let idx = pool.acquire(Instant::now()).unwrap();
        let slot = pool.slot(idx);
        assert_eq!(slot.state(), SlotState::Active);
        assert!(pool.slot_mut(idx).stream_mut().is_none());
    }

    #[test]
    fn expired_flags_idle_connections() {
        let mut pool = ConnectionPool::new(2, Duration::from_millis(0), Duration::from_secs(300));
        let past = Instant::now() - Duration::from_secs(1);
        let idx = pool.acquire(past).unwrap();

        let expired = pool.expired(Instant::now());
        assert_eq!(expired, vec![idx]);
    }

    #[test]
    fn expired_flags_overage_connections() {
        let mut pool = ConnectionPool::new(2, Duration::from_secs(60), Duration::from_millis(0));
        let past = Instant::now() - Duration::from_secs(1);
        let idx = pool.acquire(past).unwrap();

        assert_eq!(pool.expired(Instant::now()), vec![idx]);
    }

    #[test]
    fn touch_defers_idle_expiry() {
        let mut pool = ConnectionPool::new(1, Duration::from_secs(5), Duration::from_secs(300));
        let past = Instant::now() - Duration::from_secs(10);
        let idx = pool.acquire(past).unwrap();
        assert_eq!(pool.expired(Instant::now()), vec![idx]);

        pool.slot_mut(idx).touch(Instant::now());
        assert!(pool.expired(Instant::now()).is_empty());
    }

    #[test]
    fn free_slots_are_never_expired() {
        let pool = ConnectionPool::new(3, Duration::from_millis(0), Duration::from_millis(0));
        assert!(pool.expired(Instant::now()).is_empty());
    }

    #[test]
    #[should_panic(expected = "pool capacity must be positive")]
    fn zero_capacity_panics() {
        let _pool = pool(0);
    }
}
