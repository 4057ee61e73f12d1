#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

mod fmt;

pub mod att;
pub mod constants;
pub mod discovery;
pub mod packet_pool;
pub mod slots;
pub mod stack;
pub mod transport;
pub mod uuid;

#[cfg(test)]
mod mock;

pub use bt_hci::param::{ConnHandle, LeConnRole};
pub use discovery::{DiscoveryEngine, DiscoveryError, DiscoveryEvent, DiscoveryOptions};
pub use stack::{GattClient, GattServer, StackEvent};
pub use transport::{TransportEngine, TransportEvent, TransportOptions};
pub use uuid::Uuid;

/// Result of every call into the BLE stack and of every transport operation
pub type BleResult<T = ()> = Result<T, BleError>;

/// Closed result vocabulary shared with the BLE stack
///
/// `Success` is represented by `Ok`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    /// Generic failure
    Fail,
    /// No memory to carry out the operation
    OutOfMemory,
    /// A parameter is out of range or refers to an unknown connection
    InvalidParameter,
    /// A required resource (TX buffer, credit) is currently unavailable
    NoResource,
    /// The operation is not allowed in the current state
    BadState,
    /// Another procedure is outstanding; retry once the stack says so
    Busy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ble_result_default_unit() {
        let ok: BleResult = Ok(());
        let err: BleResult<u8> = Err(BleError::Busy);
        assert!(ok.is_ok());
        assert_eq!(err, Err(BleError::Busy));
    }
}
