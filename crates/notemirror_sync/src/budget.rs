//! Memory budget for downloaded-but-unpersisted note content.

use crate::cancel::CancellationToken;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tracing::debug;

// Upper bound on a single condvar wait so a cancelled token is noticed even
// if nobody notifies.
const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct BudgetState {
    consumed: u64,
    peak: u64,
}

/// Accounting of payload bytes held by download workers until the
/// coordinator persists them.
///
/// # Invariants
///
/// - A worker may proceed while `consumed < limit`. The check ignores the
///   size of the item about to be fetched, so an oversized item never
///   deadlocks. Every worker past the check adds at most one item, so with
///   `W` workers consumption stays below `limit + W * largest item`. A
///   single worker overshoots by at most one item.
/// - `release` wakes waiters once consumption drops below the limit.
/// - `reset` zeroes the counter and wakes every waiter.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: u64,
    state: Mutex<BudgetState>,
    available: Condvar,
}

impl MemoryBudget {
    /// Creates a budget of `limit` bytes.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            state: Mutex::new(BudgetState::default()),
            available: Condvar::new(),
        }
    }

    /// Blocks until consumption is below the limit or `cancel` is set.
    pub fn wait_for_budget(&self, cancel: &CancellationToken) {
        let mut state = self.state.lock();
        while state.consumed >= self.limit && !cancel.is_cancelled() {
            self.available.wait_for(&mut state, WAIT_SLICE);
        }
    }

    /// Accounts for `size` bytes now held in memory.
    pub fn consume(&self, size: u64) {
        let mut state = self.state.lock();
        state.consumed = state.consumed.saturating_add(size);
        state.peak = state.peak.max(state.consumed);
        debug!(
            "Memory consumed: {:.1}% [LIMIT {} MB]",
            percent(state.consumed, self.limit),
            self.limit / (1024 * 1024)
        );
    }

    /// Returns `size` bytes to the budget.
    pub fn release(&self, size: u64) {
        let mut state = self.state.lock();
        state.consumed = state.consumed.saturating_sub(size);
        if state.consumed < self.limit {
            self.available.notify_all();
        }
    }

    /// Forgets all consumption and wakes every waiter.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.consumed = 0;
        self.available.notify_all();
    }

    /// Returns the bytes currently accounted.
    pub fn consumed(&self) -> u64 {
        self.state.lock().consumed
    }

    /// Returns the highest consumption observed.
    pub fn peak(&self) -> u64 {
        self.state.lock().peak
    }

    /// Returns the configured limit in bytes.
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

fn percent(consumed: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    consumed as f64 * 100.0 / limit as f64
}
