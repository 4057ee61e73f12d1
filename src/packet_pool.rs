//! A packet pool for allocating and freeing fixed-size receive buffers.
//!
//! Buffers are handed out as [`PacketRef`] tokens. A token is not `Clone`, so a
//! buffer can only be freed once, and every owner of a token is responsible for
//! handing it back.

struct PacketBuf<const MTU: usize> {
    buf: [u8; MTU],
    free: bool,
}

impl<const MTU: usize> PacketBuf<MTU> {
    const NEW: PacketBuf<MTU> = PacketBuf::new();

    const fn new() -> Self {
        Self {
            buf: [0; MTU],
            free: true,
        }
    }
}

/// Token for an allocated pool buffer
#[derive(Debug, PartialEq, Eq)]
pub struct PacketRef {
    idx: usize,
    len: usize,
}

impl PacketRef {
    /// Number of valid bytes in the buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A packet pool holds `N` buffers of `MTU` bytes that can be dynamically
/// allocated and free'd.
pub struct PacketPool<const MTU: usize, const N: usize> {
    packets: [PacketBuf<MTU>; N],
}

impl<const MTU: usize, const N: usize> Default for PacketPool<MTU, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const MTU: usize, const N: usize> core::fmt::Debug for PacketPool<MTU, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketPool")
            .field("mtu", &MTU)
            .field("capacity", &N)
            .field("available", &self.available())
            .finish()
    }
}

impl<const MTU: usize, const N: usize> PacketPool<MTU, N> {
    /// Create a new packet pool with every buffer free
    #[must_use]
    pub const fn new() -> Self {
        Self {
            packets: [PacketBuf::NEW; N],
        }
    }

    /// Allocate a buffer and copy `data` into it.
    ///
    /// Returns `None` when the pool is exhausted or `data` does not fit in one
    /// buffer.
    pub fn alloc(&mut self, data: &[u8]) -> Option<PacketRef> {
        if data.len() > MTU {
            return None;
        }
        let (idx, packet) = self
            .packets
            .iter_mut()
            .enumerate()
            .find(|(_, packet)| packet.free)?;
        trace!("[POOL] alloc {}", idx);
        packet.free = false;
        packet.buf[..data.len()].copy_from_slice(data);
        Some(PacketRef {
            idx,
            len: data.len(),
        })
    }

    /// Bytes held by an allocated buffer
    #[must_use]
    pub fn get(&self, p_ref: &PacketRef) -> &[u8] {
        &self.packets[p_ref.idx].buf[..p_ref.len]
    }

    /// Return a buffer to the pool
    pub fn free(&mut self, p_ref: PacketRef) {
        trace!("[POOL] free {}", p_ref.idx);
        let packet = &mut self.packets[p_ref.idx];
        packet.buf[..p_ref.len].fill(0);
        packet.free = true;
    }

    /// Number of free buffers
    #[must_use]
    pub fn available(&self) -> usize {
        self.packets.iter().filter(|p| p.free).count()
    }

    /// Size of one buffer
    #[must_use]
    pub const fn mtu(&self) -> usize {
        MTU
    }
}
