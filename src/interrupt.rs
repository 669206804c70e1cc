//! # Interrupt bridge
//! Carries "the alarm line went low" from interrupt context into the clock service's wait set.
//!
//! The handler side only calls [`InterruptEvent::raise`], which neither blocks nor touches the device. Raising several
//! times before the task gets to run collapses into one wake, the task then reads the device flags and sees every
//! alarm that fired in the meantime.

use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::wait_set::Waitable;

/// A wait set member raised from interrupt context.
pub struct InterruptEvent {
    /// The underlying signal, carries no payload
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl InterruptEvent {
    /// Create a lowered event.
    pub const fn new() -> Self {
        Self { signal: Signal::new() }
    }

    /// Raise the event. Safe to call from an interrupt handler or a higher-priority executor.
    pub fn raise(&self) {
        self.signal.signal(());
    }

    /// The event was raised and not yet consumed by a wait.
    pub fn is_raised(&self) -> bool {
        self.signal.signaled()
    }

    /// Lower the event without waking anyone.
    pub fn reset(&self) {
        self.signal.reset();
    }
}

impl Default for InterruptEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Waitable for InterruptEvent {
    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        pin!(self.signal.wait()).poll(cx)
    }
}
