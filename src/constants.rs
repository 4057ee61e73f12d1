//! `Wrenlink` Constants
//!
//! This module contains the capacities and protocol constants used throughout the
//! `Wrenlink` library. Capacities size the fixed storage of both engines, so
//! changing them changes the memory footprint of every engine instance.

/// Maximum number of simultaneous LE links tracked by each engine
pub const MAX_CONNECTIONS: usize = 4;

/// Maximum number of services that can be registered for discovery
pub const MAX_DISCOVERY_SERVICES: usize = 6;

/// Maximum number of characteristic/descriptor entries in one service wish-list
pub const MAX_DISCOVERY_CHARACTERISTICS: usize = 8;

/// Depth of each engine's application event channel
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Default ATT MTU before any exchange
pub const ATT_DEFAULT_MTU: u16 = 23;

/// Largest ATT MTU the transparent service sizes its payloads for.
///
/// A link may negotiate more; the flow control acknowledgement still reports
/// the negotiated value, only payloads are bounded by this one.
pub const ATT_MAX_MTU: u16 = 247;

/// ATT header size of a notification or write (opcode + handle)
pub const ATT_HEADER_SIZE: u16 = 3;

/// Largest attribute payload carried in one PDU at [`ATT_MAX_MTU`]
pub const MAX_PAYLOAD_SIZE: usize = (ATT_MAX_MTU - ATT_HEADER_SIZE) as usize;

/// Lowest valid attribute handle
pub const ATT_HANDLE_MIN: u16 = 0x0001;

/// Highest valid attribute handle
pub const ATT_HANDLE_MAX: u16 = 0xFFFF;

/// Credits granted to the peer when it enables credit-based flow control.
///
/// This is also the depth of each link's receive queue.
pub const CBFC_INITIAL_CREDIT: u8 = 16;

/// Number of consumed packets after which credits are handed back to the peer.
///
/// Kept below [`CBFC_INITIAL_CREDIT`] so the peer never fully drains its window
/// while a grant is in flight.
pub const CBFC_CREDIT_RETURN_THRESHOLD: u8 = 13;

/// Depth of each link's receive queue
pub const INPUT_QUEUE_DEPTH: usize = CBFC_INITIAL_CREDIT as usize;

/// Number of receive buffers in the shared packet pool
pub const PACKET_POOL_SIZE: usize = MAX_CONNECTIONS * INPUT_QUEUE_DEPTH;

/// Largest vendor command forwarded from or sent on the Control characteristic
pub const MAX_VENDOR_COMMAND_SIZE: usize = MAX_PAYLOAD_SIZE;
