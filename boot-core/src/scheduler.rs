//! Fixed-capacity FIFO of deferred events, drained by the main loop.
//!
//! Interrupt-context producers `put` events; the run loop calls `execute` to handle
//! them in arrival order outside the interrupt.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Deque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SchedulerConfig {
    /// Depth of the event queue.
    pub queue_size: u16,
    /// RTC prescaler for the application timers.
    pub timer_prescaler: u32,
    /// Pending timer start/stop operations.
    pub timer_op_queue_size: u8,
}

impl SchedulerConfig {
    pub const DEFAULT: Self = Self {
        queue_size: 20,
        timer_prescaler: 0,
        timer_op_queue_size: 4,
    };
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull;

/// Interrupt-safe FIFO of up to `N` events.
pub struct EventQueue<E, const N: usize> {
    queue: Mutex<CriticalSectionRawMutex, RefCell<Deque<E, N>>>,
}

impl<E, const N: usize> EventQueue<E, N> {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Appends an event, or hands back [`QueueFull`] when there is no room.
    pub fn put(&self, event: E) -> Result<(), QueueFull> {
        self.queue
            .lock(|q| q.borrow_mut().push_back(event))
            .map_err(|_| QueueFull)
    }

    /// Handles queued events in FIFO order, including ones queued by `handler`
    /// itself. Returns how many were handled.
    pub fn execute(&self, mut handler: impl FnMut(E)) -> usize {
        let mut handled = 0;
        while let Some(event) = self.queue.lock(|q| q.borrow_mut().pop_front()) {
            handler(event);
            handled += 1;
        }
        handled
    }

    /// Events waiting to be handled.
    pub fn len(&self) -> usize {
        self.queue.lock(|q| q.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<E, const N: usize> Default for EventQueue<E, N> {
    fn default() -> Self {
        Self::new()
    }
}
