//! Receive queue
//!
//! Bounded FIFO of packets written by the peer on one link. The bytes live in
//! the engine's shared [`PacketPool`]; the queue only holds the tokens.

use heapless::Deque;

use crate::{
    constants::INPUT_QUEUE_DEPTH,
    packet_pool::{PacketPool, PacketRef},
    stack::WriteKind,
};

/// A queued packet
#[derive(Debug, PartialEq, Eq)]
pub struct QueuedPacket {
    /// How the peer wrote the packet
    pub kind: WriteKind,
    /// Pool buffer holding the bytes
    pub packet: PacketRef,
}

/// Per-link receive queue holding at most [`INPUT_QUEUE_DEPTH`] packets
#[derive(Debug, Default)]
pub struct InputQueue {
    packets: Deque<QueuedPacket, INPUT_QUEUE_DEPTH>,
}

impl InputQueue {
    /// Create an empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            packets: Deque::new(),
        }
    }

    /// Append a packet.
    ///
    /// # Errors
    /// Gives the packet back when the queue is full; nothing is enqueued.
    pub fn push(&mut self, kind: WriteKind, packet: PacketRef) -> Result<(), QueuedPacket> {
        self.packets.push_back(QueuedPacket { kind, packet })
    }

    /// Remove the oldest packet
    pub fn pop(&mut self) -> Option<QueuedPacket> {
        self.packets.pop_front()
    }

    /// The oldest packet
    #[must_use]
    pub fn front(&self) -> Option<&QueuedPacket> {
        self.packets.front()
    }

    /// Number of queued packets
    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Whether another packet would be dropped
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.packets.is_full()
    }

    /// Return every queued buffer to `pool`
    pub fn drain<const MTU: usize, const N: usize>(&mut self, pool: &mut PacketPool<MTU, N>) {
        while let Some(queued) = self.packets.pop_front() {
            pool.free(queued.packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut pool: PacketPool<8, 4> = PacketPool::new();
        let mut queue = InputQueue::new();
        for i in 0..3u8 {
            let packet = pool.alloc(&[i; 2]).unwrap();
            queue.push(WriteKind::Command, packet).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front().unwrap().packet.len(), 2);

        for i in 0..3u8 {
            let queued = queue.pop().unwrap();
            assert_eq!(pool.get(&queued.packet), &[i; 2]);
            pool.free(queued.packet);
        }
        assert!(queue.pop().is_none());
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_full_queue_gives_packet_back() {
        let mut pool: PacketPool<4, { INPUT_QUEUE_DEPTH + 1 }> = PacketPool::new();
        let mut queue = InputQueue::new();
        for _ in 0..INPUT_QUEUE_DEPTH {
            let packet = pool.alloc(&[1]).unwrap();
            queue.push(WriteKind::Request, packet).unwrap();
        }
        assert!(queue.is_full());

        let extra = pool.alloc(&[2]).unwrap();
        let rejected = queue.push(WriteKind::Command, extra).unwrap_err();
        assert_eq!(queue.len(), INPUT_QUEUE_DEPTH);
        pool.free(rejected.packet);

        queue.drain(&mut pool);
        assert!(queue.is_empty());
        assert_eq!(pool.available(), INPUT_QUEUE_DEPTH + 1);
    }
}
