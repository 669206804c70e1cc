//! # Wait set
//! Lets one task block on several readiness sources at once: the "has data" side of its channel endpoints and raw
//! events such as the interrupt bridge. The owner registers every source under an id of its own choosing (usually a
//! small per-service enum) and then calls [`WaitSet::wait_any`] in its event loop.
//!
//! Readiness of a channel is level triggered: a source stays ready for as long as its queue holds messages, so the
//! owner must receive after a `Ready` or it will be woken again for the same source. Events are edge triggered and
//! consumed by the wake.

use core::future::poll_fn;
use core::ptr;
use core::task::{Context, Poll};

use embassy_futures::poll_once;
use embassy_time::{Duration, with_timeout};
use heapless::Vec;

use crate::channel::Endpoint;

/// Default number of members of a wait set.
pub const DEFAULT_MEMBERS: usize = 10;

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Do not wait, only look at what is already there
    Poll,
    /// Wait at most this long
    After(Duration),
    /// Wait until something happens
    Forever,
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// Something a task can wait on.
pub trait Waitable {
    /// `Ready` if the source has something for its owner, otherwise register the waker and return `Pending`.
    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()>;
}

/// Result of [`WaitSet::wait_any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wake<Id> {
    /// The member registered under this id is ready
    Ready(Id),
    /// Nothing became ready in time
    TimedOut,
}

/// Errors when registering a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitSetError {
    /// The id or the source is already registered
    Duplicate,
    /// The wait set has no free slot
    Full,
}

/// A member: the id the owner gave it and the source itself.
type Member<'a, Id> = (Id, &'a (dyn Waitable + Sync));

/// A per-task set of up to `N` readiness sources.
pub struct WaitSet<'a, Id, const N: usize = DEFAULT_MEMBERS> {
    /// Registered members, in registration order
    members: Vec<Member<'a, Id>, N>,
    /// Member to poll first on the next wait
    next: usize,
}

impl<'a, Id: Copy + PartialEq, const N: usize> WaitSet<'a, Id, N> {
    /// Create an empty wait set.
    pub const fn new() -> Self {
        Self {
            members: Vec::new(),
            next: 0,
        }
    }

    /// Add a readiness source under `id`.
    ///
    /// # Panics
    /// If `id` or `source` is already registered or the set is full. Wait sets are built once at start-up, so any of
    /// these is a wiring bug.
    pub fn register(&mut self, id: Id, source: &'a (dyn Waitable + Sync)) {
        if let Err(e) = self.try_register(id, source) {
            panic!("cannot register wait set member: {:?}", e);
        }
    }

    /// Add a readiness source under `id`, reporting a duplicate or a full set instead of panicking.
    pub fn try_register(&mut self, id: Id, source: &'a (dyn Waitable + Sync)) -> Result<(), WaitSetError> {
        let duplicate = self
            .members
            .iter()
            .any(|(other, existing)| *other == id || ptr::addr_eq(*existing, source));
        if duplicate {
            return Err(WaitSetError::Duplicate);
        }
        self.members.push((id, source)).map_err(|_| WaitSetError::Full)
    }

    /// Add the "has data" signal of a channel endpoint under `id`.
    ///
    /// # Panics
    /// If the endpoint's channel is not connected yet, or on the same conditions as [`Self::register`].
    pub fn register_endpoint<M: Send, const D: usize>(&mut self, id: Id, endpoint: &Endpoint<'a, M, D>) {
        assert!(endpoint.is_connected(), "cannot register an unconnected endpoint");
        self.register(id, endpoint.readable());
    }

    /// Number of registered members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// No member registered yet.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Wait until one member is ready or `timeout` elapses.
    ///
    /// Members are polled round-robin, starting after the one that was ready last, so a source that is always ready
    /// cannot starve the others.
    pub async fn wait_any(&mut self, timeout: Timeout) -> Wake<Id> {
        match timeout {
            Timeout::Poll => match poll_once(self.any_ready()) {
                Poll::Ready(id) => Wake::Ready(id),
                Poll::Pending => Wake::TimedOut,
            },
            Timeout::After(duration) => match with_timeout(duration, self.any_ready()).await {
                Ok(id) => Wake::Ready(id),
                Err(_) => Wake::TimedOut,
            },
            Timeout::Forever => Wake::Ready(self.any_ready().await),
        }
    }

    /// Resolves with the id of the first ready member.
    fn any_ready(&mut self) -> impl Future<Output = Id> + '_ {
        poll_fn(move |cx| {
            let count = self.members.len();
            for offset in 0..count {
                let index = (self.next + offset) % count;
                let (id, source) = self.members[index];
                if source.poll_ready(cx).is_ready() {
                    self.next = (index + 1) % count;
                    return Poll::Ready(id);
                }
            }
            Poll::Pending
        })
    }
}

impl<Id: Copy + PartialEq, const N: usize> Default for WaitSet<'_, Id, N> {
    fn default() -> Self {
        Self::new()
    }
}
