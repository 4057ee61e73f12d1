//! Transparent UART Data Service
//!
//! GATT server side of the Microchip-style transparent UART profile. The
//! service exposes three characteristics:
//!
//! * **TX** (notify): data from the local device to the peer
//! * **RX** (write, write without response): data from the peer, queued per
//!   link until the application drains it
//! * **Control** (write, notify): credit based flow control and vendor
//!   commands, see [`control`]
//!
//! The attribute table itself belongs to the BLE stack; the engine only needs
//! to know the handles, see [`ServiceHandles`].

pub mod control;
pub mod credit;
pub mod engine;
pub mod queue;

pub use engine::TransportEngine;

use bt_hci::param::ConnHandle;
use heapless::Vec;

use crate::{constants::MAX_VENDOR_COMMAND_SIZE, uuid::Uuid};

/// Transparent UART service
pub const TRANSPARENT_SERVICE_UUID: Uuid =
    Uuid::new_long(0x4953_5343_FE7D_4AE5_8FA9_9FAF_D205_E455);
/// TX characteristic (server to client notifications)
pub const TRANSPARENT_TX_UUID: Uuid = Uuid::new_long(0x4953_5343_1E4D_4BD9_BA61_23C6_4724_9616);
/// RX characteristic (client writes)
pub const TRANSPARENT_RX_UUID: Uuid = Uuid::new_long(0x4953_5343_8841_43F4_A8D4_ECBE_3472_9BB3);
/// Control characteristic
pub const TRANSPARENT_CTRL_UUID: Uuid = Uuid::new_long(0x4953_5343_4C8A_39B3_2F49_511C_FF07_3B7E);

/// Attribute handles of the transparent service
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHandles {
    /// Service declaration
    pub service: u16,
    /// TX characteristic value
    pub tx_value: u16,
    /// TX client characteristic configuration
    pub tx_cccd: u16,
    /// RX characteristic value
    pub rx_value: u16,
    /// Control characteristic value
    pub ctrl_value: u16,
    /// Control client characteristic configuration
    pub ctrl_cccd: u16,
}

impl ServiceHandles {
    /// Handles of a service table starting at `start`, laid out as
    ///
    /// ```text
    /// start + 0  service declaration
    /// start + 1  TX declaration     start + 2  TX value     start + 3  TX CCCD
    /// start + 4  RX declaration     start + 5  RX value
    /// start + 6  Ctrl declaration   start + 7  Ctrl value   start + 8  Ctrl CCCD
    /// ```
    #[must_use]
    pub const fn from_start(start: u16) -> Self {
        Self {
            service: start,
            tx_value: start + 2,
            tx_cccd: start + 3,
            rx_value: start + 5,
            ctrl_value: start + 7,
            ctrl_cccd: start + 8,
        }
    }

    /// Whether `handle` belongs to the service
    #[must_use]
    pub const fn contains(&self, handle: u16) -> bool {
        handle >= self.service && handle <= self.ctrl_cccd
    }
}

/// Transport configuration
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Where the stack placed the service
    pub handles: ServiceHandles,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            handles: ServiceHandles::from_start(0x0010),
        }
    }
}

/// Events raised by the transport engine
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The peer enabled or disabled Control notifications
    CtrlStatus {
        /// Connection handle
        conn: ConnHandle,
        /// Notifications are enabled
        enabled: bool,
    },
    /// The peer enabled or disabled TX notifications
    TxStatus {
        /// Connection handle
        conn: ConnHandle,
        /// Notifications are enabled
        enabled: bool,
    },
    /// The peer switched on credit based flow control for its writes
    CbfcEnabled {
        /// Connection handle
        conn: ConnHandle,
    },
    /// The peer granted credits for outgoing data
    CbfcCredit {
        /// Connection handle
        conn: ConnHandle,
        /// Credits granted by this write
        credit: u8,
    },
    /// A packet was queued; drain it with [`TransportEngine::get_data`]
    ReceiveData {
        /// Connection handle
        conn: ConnHandle,
    },
    /// A vendor opcode arrived on the Control characteristic
    VendorCommand {
        /// Connection handle
        conn: ConnHandle,
        /// Full payload, opcode first
        payload: Vec<u8, MAX_VENDOR_COMMAND_SIZE>,
    },
    /// An operation failed with no caller to report to
    ErrorUnspecified {
        /// Connection handle
        conn: ConnHandle,
    },
    /// A received packet was dropped
    ErrorNoMemory {
        /// Connection handle
        conn: ConnHandle,
    },
}
