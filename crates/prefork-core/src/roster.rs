//! Fixed-size worker roster with round-robin selection
//!
//! The master keeps one `Slot` per worker, indexed by the worker's position in
//! the pool. A slot starts `Live(pid)` and becomes `Dead` exactly once, when
//! the worker is reaped. The table is never resized.
//!
//! Selection is strict round-robin over live slots: scan forward from the
//! cursor, skip dead slots, examine at most `size` slots, and move the cursor
//! to the slot after the one chosen.

use core::fmt;

/// Process id as used by the OS.
pub type Pid = libc::pid_t;

/// One worker position in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Worker is running with this pid
    Live(Pid),
    /// Worker has been reaped
    Dead,
}

impl Slot {
    #[inline]
    pub fn pid(&self) -> Option<Pid> {
        match *self {
            Slot::Live(pid) => Some(pid),
            Slot::Dead => None,
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, Slot::Live(_))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Live(pid) => write!(f, "live({})", pid),
            Slot::Dead => write!(f, "dead"),
        }
    }
}

/// Master-side table of workers.
#[derive(Debug, Clone)]
pub struct Roster {
    slots: Box<[Slot]>,
    /// Round-robin cursor, always in `0..size` (0 when empty)
    next: usize,
    /// Number of slots that went Live -> Dead
    reaped: usize,
}

impl Roster {
    /// Build a roster from the pids of freshly spawned workers, in slot order.
    pub fn from_pids(pids: Vec<Pid>) -> Self {
        Self {
            slots: pids.into_iter().map(Slot::Live).collect(),
            next: 0,
            reaped: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn next_index(&self) -> usize {
        self.next
    }

    #[inline]
    pub fn reaped(&self) -> usize {
        self.reaped
    }

    /// True once every worker has been reaped.
    #[inline]
    pub fn all_reaped(&self) -> bool {
        self.reaped == self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_live()).count()
    }

    /// `(index, pid)` of every live worker.
    pub fn live(&self) -> impl Iterator<Item = (usize, Pid)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.pid().map(|pid| (i, pid)))
    }

    /// Pick the next live worker and advance the cursor past it.
    ///
    /// Returns `None` when no slot is live; the cursor is left untouched.
    pub fn select(&mut self) -> Option<usize> {
        let size = self.slots.len();
        for step in 0..size {
            let idx = (self.next + step) % size;
            if self.slots[idx].is_live() {
                self.next = (idx + 1) % size;
                return Some(idx);
            }
        }
        None
    }

    /// Mark the slot holding `pid` dead and count it as reaped.
    ///
    /// Returns the slot index, or `None` if no live slot holds `pid`.
    pub fn mark_dead(&mut self, pid: Pid) -> Option<usize> {
        let idx = self.slots.iter().position(|s| *s == Slot::Live(pid))?;
        self.slots[idx] = Slot::Dead;
        self.reaped += 1;
        Some(idx)
    }
}
