//! # Channel
//! A bounded, bidirectional, strictly 1:1 message pipe between two tasks.
//!
//! A channel is two bounded FIFO queues, one per direction. It is created once at wiring time (usually in a
//! `static`), then the two sides are claimed: [`Channel::open`] hands out the owner side, [`Channel::connect`] the
//! peer side. Each side can be claimed exactly once, a second claim is a wiring bug and panics.
//!
//! Sending never blocks. A full queue hands the message back as [`SendError::Full`] so the sender can log or retry,
//! nothing is dropped silently.

use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel as Queue, TrySendError};
use embassy_time::with_timeout;
use portable_atomic::{AtomicBool, Ordering};

use crate::wait_set::{Timeout, Waitable};

/// Default queue depth of the channels between the services.
pub const DEFAULT_DEPTH: usize = 4;

/// One direction of a channel.
pub struct Direction<M, const N: usize> {
    /// The bounded queue
    queue: Queue<CriticalSectionRawMutex, M, N>,
}

impl<M, const N: usize> Direction<M, N> {
    /// Create an empty direction.
    const fn new() -> Self {
        Self { queue: Queue::new() }
    }
}

impl<M, const N: usize> Waitable for Direction<M, N> {
    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.queue.poll_ready_to_receive(cx)
    }
}

/// A bidirectional channel with `N` slots per direction.
pub struct Channel<M, const N: usize = DEFAULT_DEPTH> {
    /// Owner to peer
    downstream: Direction<M, N>,
    /// Peer to owner
    upstream: Direction<M, N>,
    /// The owner side has been claimed
    opened: AtomicBool,
    /// The peer side has been claimed
    connected: AtomicBool,
}

/// Errors when claiming a side of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectError {
    /// The owner side was already handed out
    AlreadyOpen,
    /// The peer side was already handed out
    AlreadyConnected,
}

/// A message could not be sent.
#[derive(Debug, Clone, PartialEq)]
pub enum SendError<M> {
    /// The queue towards the peer is full, the message is handed back
    Full(M),
}

impl<M> SendError<M> {
    /// Take the message that could not be sent.
    pub fn into_inner(self) -> M {
        match self {
            Self::Full(message) => message,
        }
    }
}

impl<M, const N: usize> Channel<M, N> {
    /// Create an unconnected channel.
    pub const fn new() -> Self {
        Self {
            downstream: Direction::new(),
            upstream: Direction::new(),
            opened: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    /// Queue depth per direction.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Claim the owner side of the channel.
    ///
    /// # Panics
    /// If the owner side was already claimed. This is a wiring bug, not a runtime condition.
    pub fn open(&self) -> Endpoint<'_, M, N> {
        match self.try_open() {
            Ok(endpoint) => endpoint,
            Err(e) => panic!("cannot open channel: {:?}", e),
        }
    }

    /// Claim the owner side of the channel, reporting a second claim instead of panicking.
    pub fn try_open(&self) -> Result<Endpoint<'_, M, N>, ConnectError> {
        if self.opened.swap(true, Ordering::AcqRel) {
            return Err(ConnectError::AlreadyOpen);
        }
        Ok(Endpoint {
            channel: self,
            rx: &self.upstream,
            tx: &self.downstream,
        })
    }

    /// Claim the peer side of the channel.
    ///
    /// # Panics
    /// If the channel is already connected. This is a wiring bug, not a runtime condition.
    pub fn connect(&self) -> Endpoint<'_, M, N> {
        match self.try_connect() {
            Ok(endpoint) => endpoint,
            Err(e) => panic!("cannot connect channel: {:?}", e),
        }
    }

    /// Claim the peer side of the channel, reporting a second claim instead of panicking.
    ///
    /// A failed attempt leaves the existing peer untouched.
    pub fn try_connect(&self) -> Result<Endpoint<'_, M, N>, ConnectError> {
        if self.connected.swap(true, Ordering::AcqRel) {
            return Err(ConnectError::AlreadyConnected);
        }
        Ok(Endpoint {
            channel: self,
            rx: &self.downstream,
            tx: &self.upstream,
        })
    }

    /// Both sides have been claimed.
    pub fn is_connected(&self) -> bool {
        self.opened.load(Ordering::Acquire) && self.connected.load(Ordering::Acquire)
    }
}

impl<M, const N: usize> Default for Channel<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// One side of a channel, owned by exactly one task.
pub struct Endpoint<'a, M, const N: usize = DEFAULT_DEPTH> {
    /// The channel this endpoint belongs to
    channel: &'a Channel<M, N>,
    /// Inbound direction
    rx: &'a Direction<M, N>,
    /// Outbound direction
    tx: &'a Direction<M, N>,
}

impl<'a, M, const N: usize> Endpoint<'a, M, N> {
    /// Send a message to the peer without blocking.
    ///
    /// # Errors
    /// `SendError::Full` with the message if the queue towards the peer has no free slot.
    pub fn send(&self, message: M) -> Result<(), SendError<M>> {
        self.tx.queue.try_send(message).map_err(|e| match e {
            TrySendError::Full(message) => SendError::Full(message),
        })
    }

    /// Receive the next message from the peer, waiting according to `timeout`.
    ///
    /// Returns `None` if nothing arrived in time.
    pub async fn receive(&self, timeout: Timeout) -> Option<M> {
        match timeout {
            Timeout::Poll => self.rx.queue.try_receive().ok(),
            Timeout::After(duration) => with_timeout(duration, self.rx.queue.receive()).await.ok(),
            Timeout::Forever => Some(self.rx.queue.receive().await),
        }
    }

    /// Receive the next message if one is queued.
    pub fn try_receive(&self) -> Option<M> {
        self.rx.queue.try_receive().ok()
    }

    /// Drop everything queued towards this endpoint, returning how many messages were discarded.
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.rx.queue.try_receive().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Number of messages waiting to be received.
    pub fn pending(&self) -> usize {
        self.rx.queue.len()
    }

    /// The "has data" signal of this endpoint, to be registered in a wait set.
    pub fn readable(&self) -> &'a Direction<M, N> {
        self.rx
    }

    /// Both sides of the underlying channel have been claimed.
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_time::Duration;

    #[test]
    fn messages_arrive_in_send_order() {
        let channel: Channel<u32, 8> = Channel::new();
        let owner = channel.open();
        let peer = channel.connect();

        for n in 1..=8 {
            owner.send(n).unwrap();
        }

        let received: Vec<u32> = (0..8).filter_map(|_| peer.try_receive()).collect();
        assert_eq!(received, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn directions_are_independent() {
        let channel: Channel<&str, 2> = Channel::new();
        let owner = channel.open();
        let peer = channel.connect();

        owner.send("down").unwrap();
        peer.send("up").unwrap();

        assert_eq!(owner.try_receive(), Some("up"));
        assert_eq!(peer.try_receive(), Some("down"));
        assert_eq!(owner.try_receive(), None);
        assert_eq!(peer.try_receive(), None);
    }

    #[test]
    fn full_queue_hands_the_newest_message_back() {
        let channel: Channel<u8, 2> = Channel::new();
        let owner = channel.open();
        let peer = channel.connect();

        owner.send(1).unwrap();
        owner.send(2).unwrap();
        assert_eq!(owner.send(3), Err(SendError::Full(3)));

        // the oldest messages are preserved
        assert_eq!(peer.try_receive(), Some(1));
        assert_eq!(peer.try_receive(), Some(2));
        assert_eq!(peer.try_receive(), None);
    }

    #[test]
    fn second_connect_fails_without_touching_the_first_peer() {
        let channel: Channel<u8, 2> = Channel::new();
        let owner = channel.open();
        let peer = channel.connect();

        assert!(matches!(channel.try_connect(), Err(ConnectError::AlreadyConnected)));
        assert!(matches!(channel.try_connect(), Err(ConnectError::AlreadyConnected)));

        owner.send(7).unwrap();
        assert_eq!(peer.try_receive(), Some(7));
        peer.send(9).unwrap();
        assert_eq!(owner.try_receive(), Some(9));
    }

    #[test]
    #[should_panic(expected = "cannot connect channel")]
    fn second_connect_panics() {
        let channel: Channel<u8, 2> = Channel::new();
        let _owner = channel.open();
        let _peer = channel.connect();
        let _again = channel.connect();
    }

    #[test]
    fn second_open_is_rejected() {
        let channel: Channel<u8, 2> = Channel::new();
        let _owner = channel.open();
        assert!(matches!(channel.try_open(), Err(ConnectError::AlreadyOpen)));
    }

    #[test]
    fn connected_only_once_both_sides_are_claimed() {
        let channel: Channel<u8, 2> = Channel::new();
        assert!(!channel.is_connected());
        let owner = channel.open();
        assert!(!owner.is_connected());
        let _peer = channel.connect();
        assert!(owner.is_connected());
    }

    #[test]
    fn receive_times_out_on_an_empty_queue() {
        let channel: Channel<u8, 2> = Channel::new();
        let _owner = channel.open();
        let peer = channel.connect();

        assert_eq!(block_on(peer.receive(Timeout::Poll)), None);
        assert_eq!(
            block_on(peer.receive(Timeout::After(Duration::from_millis(10)))),
            None
        );
    }

    #[test]
    fn receive_returns_queued_message_without_waiting() {
        let channel: Channel<u8, 2> = Channel::new();
        let owner = channel.open();
        let peer = channel.connect();

        owner.send(42).unwrap();
        assert_eq!(block_on(peer.receive(Timeout::Forever)), Some(42));
    }

    #[test]
    fn drain_discards_stale_messages() {
        let channel: Channel<u8, 4> = Channel::new();
        let owner = channel.open();
        let peer = channel.connect();

        owner.send(1).unwrap();
        owner.send(2).unwrap();
        assert_eq!(peer.pending(), 2);
        assert_eq!(peer.drain(), 2);
        assert_eq!(peer.pending(), 0);
    }
}
