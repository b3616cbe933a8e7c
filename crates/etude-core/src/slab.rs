use std::sync::Arc;

use parking_lot::Mutex;

use crate::conn::{Connection, ConnectionSettings};

/// A connection slot shared between the reactor and the worker handling it.
///
/// One-shot registration guarantees at most one thread works on a slot at a
/// time, so the lock is never contended; it only makes the hand-off safe.
pub type Slot = Arc<Mutex<Connection>>;

/// Registration token of the listening socket.
pub const LISTENER_TOKEN: u64 = u64::MAX;
/// Registration token of the shutdown waker.
pub const WAKER_TOKEN: u64 = u64::MAX - 1;

// Generations wrap below u32::MAX so no slot token collides with the reserved ones.
const GENERATION_LIMIT: u32 = u32::MAX;

struct Entry {
    slot: Slot,
    generation: u32,
    occupied: bool,
}

/// Arena of connection slots with an explicit free list.
///
/// Slots are created lazily up to `capacity` and reused afterwards. A token
/// is `(generation << 32) | index`; releasing a slot bumps its generation so
/// a stale token can never reach the next occupant.
pub struct ConnectionSlab {
    entries: Vec<Entry>,
    free: Vec<u32>,
    capacity: usize,
    active: usize,
    settings: Arc<ConnectionSettings>,
}

impl ConnectionSlab {
    pub fn new(capacity: usize, settings: Arc<ConnectionSettings>) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            capacity: capacity.min(u32::MAX as usize),
            active: 0,
            settings,
        }
    }

    fn token(index: u32, generation: u32) -> u64 {
        (u64::from(generation) << 32) | u64::from(index)
    }

    fn split(token: u64) -> (usize, u32) {
        ((token & 0xFFFF_FFFF) as usize, (token >> 32) as u32)
    }

    /// Claim a free slot. `None` when every slot is occupied.
    pub fn allocate(&mut self) -> Option<(u64, Slot)> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.entries.len() < self.capacity => {
                self.entries.push(Entry {
                    slot: Arc::new(Mutex::new(Connection::new(self.settings.clone()))),
                    generation: 0,
                    occupied: false,
                });
                (self.entries.len() - 1) as u32
            }
            None => return None,
        };

        let entry = &mut self.entries[index as usize];
        entry.occupied = true;
        self.active += 1;
        Some((Self::token(index, entry.generation), entry.slot.clone()))
    }

    /// The slot a token refers to, if it is still the current occupant.
    pub fn get(&self, token: u64) -> Option<&Slot> {
        let (index, generation) = Self::split(token);
        self.entries
            .get(index)
            .filter(|e| e.occupied && e.generation == generation)
            .map(|e| &e.slot)
    }

    /// Return a slot to the free list. Stale tokens are ignored.
    pub fn release(&mut self, token: u64) -> bool {
        let (index, generation) = Self::split(token);
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if !entry.occupied || entry.generation != generation {
            return false;
        }

        entry.occupied = false;
        entry.generation = (entry.generation + 1) % GENERATION_LIMIT;
        self.free.push(index as u32);
        self.active -= 1;
        true
    }

    /// Tokens of every occupied slot.
    pub fn tokens(&self) -> Vec<u64> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.occupied)
            .map(|(i, e)| Self::token(i as u32, e.generation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    pub fn is_full(&self) -> bool {
        self.active == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
