//! The cross-LP schedule queue: a single ladder queue behind one mutex,
//! shared by every worker thread (§4.C, §5 "Schedule queue: mutable by any
//! worker under its single mutex").
mod ladder;

use std::sync::Mutex;

use crate::event::Event;
use crate::KernelError;

pub use ladder::LadderQueue;

/// The schedule queue the worker loop polls. Thin `Mutex` wrapper around
/// [`LadderQueue`] -- all the tier logic lives there.
pub struct ScheduleQueue {
    inner: Mutex<LadderQueue>,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LadderQueue::new()),
        }
    }

    pub fn insert(&self, event: Event) -> Result<(), KernelError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| KernelError::LockPoisoned("schedule queue".to_string()))?;
        guard.insert(event);
        Ok(())
    }

    pub fn pop_min(&self) -> Result<Option<Event>, KernelError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| KernelError::LockPoisoned("schedule queue".to_string()))?;
        Ok(guard.dequeue())
    }

    /// Tombstone `event` so it is skipped if it is later dequeued. Used
    /// when a rollback supersedes an event still sitting in the ladder.
    pub fn erase(&self, event: &Event) -> Result<(), KernelError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| KernelError::LockPoisoned("schedule queue".to_string()))?;
        guard.erase(event);
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool, KernelError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| KernelError::LockPoisoned("schedule queue".to_string()))?;
        Ok(guard.is_empty())
    }
}

impl Default for ScheduleQueue {
    fn default() -> Self {
        Self::new()
    }
}
