//! BLE Stack Collaborator
//!
//! Both engines sit on top of an existing GATT/ATT implementation. This module
//! describes that boundary:
//!
//! * the calls the engines make into the stack ([`GattClient`], [`GattServer`]),
//!   each answering with a [`BleResult`]
//! * the events the stack feeds into the engines ([`StackEvent`])
//!
//! Events are borrowed views over the stack's own buffers; engines copy what
//! they keep.

use bt_hci::param::{ConnHandle, LeConnRole};

use crate::{BleResult, att::AttErrorCode, uuid::Uuid};

/// GATT client requests issued by the discovery engine
pub trait GattClient {
    /// Discover the primary service with `uuid` within `start..=end`
    ///
    /// # Errors
    /// `Busy` when another client procedure is outstanding on the link; any
    /// other error when the request could not be issued at all.
    fn discover_primary_service_by_uuid(
        &mut self,
        conn: ConnHandle,
        start: u16,
        end: u16,
        uuid: &Uuid,
    ) -> BleResult;

    /// Discover every characteristic declaration within `start..=end`
    ///
    /// # Errors
    /// As [`GattClient::discover_primary_service_by_uuid`].
    fn discover_all_characteristics(&mut self, conn: ConnHandle, start: u16, end: u16)
    -> BleResult;

    /// Discover every descriptor within `start..=end`
    ///
    /// # Errors
    /// As [`GattClient::discover_primary_service_by_uuid`].
    fn discover_all_descriptors(&mut self, conn: ConnHandle, start: u16, end: u16) -> BleResult;
}

/// Response to an ATT write request
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResponse {
    /// `ATT_WRITE_RSP`
    Accept,
    /// `ATT_ERROR_RSP` for the given request
    Reject {
        /// Opcode of the request being rejected
        request_opcode: u8,
        /// Attribute the request targeted
        attr_handle: u16,
        /// Error reported to the peer
        error: AttErrorCode,
    },
}

/// GATT server calls issued by the transparent data service
pub trait GattServer {
    /// Send a Handle Value Notification
    ///
    /// # Errors
    /// `NoResource`/`OutOfMemory` when no TX buffer is free; the stack raises
    /// [`StackEvent::TxBufferAvailable`] once one is.
    fn send_notification(&mut self, conn: ConnHandle, attr_handle: u16, value: &[u8])
    -> BleResult;

    /// Answer the outstanding write request on `conn`
    ///
    /// # Errors
    /// As [`GattServer::send_notification`].
    fn send_write_response(&mut self, conn: ConnHandle, response: &WriteResponse) -> BleResult;

    /// Answer the outstanding read request on `conn`
    ///
    /// # Errors
    /// As [`GattServer::send_notification`].
    fn send_read_response(&mut self, conn: ConnHandle, value: &[u8]) -> BleResult;
}

/// GAP events
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapEvent {
    /// LE connection complete
    Connected {
        /// Connection handle
        conn: ConnHandle,
        /// Local role on the link
        role: LeConnRole,
        /// HCI status; anything but zero is a failed connection attempt
        status: u8,
    },
    /// Disconnection complete
    Disconnected {
        /// Connection handle
        conn: ConnHandle,
        /// HCI disconnect reason
        reason: u8,
    },
    /// Encryption change or key refresh
    EncryptionChanged {
        /// Connection handle
        conn: ConnHandle,
        /// HCI status; zero means the link is now encrypted
        status: u8,
    },
}

/// Handle range of a discovered service instance
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    /// Service declaration handle
    pub start: u16,
    /// Last handle of the service group
    pub end: u16,
}

/// Discovered characteristic declaration
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDeclaration {
    /// Handle of the declaration attribute
    pub decl_handle: u16,
    /// Characteristic properties bit field
    pub properties: u8,
    /// Handle of the value attribute
    pub value_handle: u16,
    /// Characteristic UUID
    pub uuid: Uuid,
}

/// Discovered descriptor
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorInfo {
    /// Descriptor handle
    pub handle: u16,
    /// 16-bit descriptor UUID
    pub uuid: u16,
}

/// GATT client events
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattClientEvent<'d> {
    /// Primary-service-by-UUID results
    ServiceByUuidResponse {
        /// Connection handle
        conn: ConnHandle,
        /// Service instances found in this response
        services: &'d [HandleRange],
        /// The procedure has finished
        finished: bool,
    },
    /// All-characteristics results
    CharacteristicsResponse {
        /// Connection handle
        conn: ConnHandle,
        /// Declarations found in this response
        characteristics: &'d [CharacteristicDeclaration],
        /// The procedure has finished
        finished: bool,
    },
    /// All-descriptors results
    DescriptorsResponse {
        /// Connection handle
        conn: ConnHandle,
        /// Descriptors found in this response
        descriptors: &'d [DescriptorInfo],
        /// The procedure has finished
        finished: bool,
    },
    /// The peer answered a request with `ATT_ERROR_RSP`
    ErrorResponse {
        /// Connection handle
        conn: ConnHandle,
        /// Opcode of the failed request
        request_opcode: u8,
        /// Handle in error
        attr_handle: u16,
        /// Error code
        error: AttErrorCode,
    },
    /// A request refused earlier with `Busy` can now be issued
    ProtocolAvailable {
        /// Connection handle
        conn: ConnHandle,
    },
    /// The ATT transaction timer expired; the bearer is unusable
    Timeout {
        /// Connection handle
        conn: ConnHandle,
    },
}

/// Kind of an incoming attribute write
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// `ATT_WRITE_REQ`, expects a response
    Request,
    /// `ATT_WRITE_CMD`, no response
    Command,
    /// `ATT_PREPARE_WRITE_REQ`, part of a long write
    PrepareWrite,
}

impl WriteKind {
    /// ATT opcode of the write
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Request => crate::att::ATT_WRITE_REQ,
            Self::Command => crate::att::ATT_WRITE_CMD,
            Self::PrepareWrite => crate::att::ATT_PREPARE_WRITE_REQ,
        }
    }

    /// Whether the peer waits for a response
    #[must_use]
    pub const fn needs_response(self) -> bool {
        !matches!(self, Self::Command)
    }
}

/// GATT server events
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattServerEvent<'d> {
    /// The peer wrote an attribute
    Write {
        /// Connection handle
        conn: ConnHandle,
        /// Attribute written
        attr_handle: u16,
        /// Write kind
        kind: WriteKind,
        /// Written value
        data: &'d [u8],
    },
    /// The peer reads an attribute whose value the application supplies
    Read {
        /// Connection handle
        conn: ConnHandle,
        /// Attribute read
        attr_handle: u16,
    },
}

/// Everything the stack reports to the engines
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent<'d> {
    /// GAP event
    Gap(GapEvent),
    /// GATT client event
    GattClient(GattClientEvent<'d>),
    /// GATT server event
    GattServer(GattServerEvent<'d>),
    /// ATT MTU exchange finished
    MtuUpdated {
        /// Connection handle
        conn: ConnHandle,
        /// Negotiated ATT MTU
        mtu: u16,
    },
    /// TX buffers were released on a link
    TxBufferAvailable {
        /// Connection handle
        conn: ConnHandle,
    },
}
