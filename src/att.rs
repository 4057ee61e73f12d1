//! ATT protocol values
//!
//! Request opcodes reported back in error responses and the error codes both
//! engines send or react to.

/// Find Information Request (all-descriptors discovery)
pub const ATT_FIND_INFORMATION_REQ: u8 = 0x04;
/// Find By Type Value Request (primary-service-by-UUID discovery)
pub const ATT_FIND_BY_TYPE_VALUE_REQ: u8 = 0x06;
/// Read By Type Request (all-characteristics discovery)
pub const ATT_READ_BY_TYPE_REQ: u8 = 0x08;
/// Read Request
pub const ATT_READ_REQ: u8 = 0x0a;
/// Write Request
pub const ATT_WRITE_REQ: u8 = 0x12;
/// Prepare Write Request
pub const ATT_PREPARE_WRITE_REQ: u8 = 0x16;
/// Write Command
pub const ATT_WRITE_CMD: u8 = 0x52;

/// Client Characteristic Configuration value with notifications enabled
pub const CCCD_NOTIFY: u16 = 0x0001;
/// Client Characteristic Configuration value with everything disabled
pub const CCCD_DISABLED: u16 = 0x0000;

/// Attribute Error Code
///
/// Value carried in an `ATT_ERROR_RSP` PDU, Bluetooth Core Specification
/// Vol 3, Part F, 3.4.1.1.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct AttErrorCode {
    value: u8,
}

impl AttErrorCode {
    /// Attempted to use a handle that isn't valid on this server
    pub const INVALID_HANDLE: Self = Self { value: 0x01 };
    /// The attribute requires authentication before it can be read or written
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self { value: 0x05 };
    /// ATT Server does not support the request received from the client
    pub const REQUEST_NOT_SUPPORTED: Self = Self { value: 0x06 };
    /// No attribute found within the given attribute handle range
    pub const ATTRIBUTE_NOT_FOUND: Self = Self { value: 0x0a };
    /// The attribute value length is invalid for the operation
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: Self = Self { value: 0x0d };
    /// The request encountered an error that was unlikely
    pub const UNLIKELY_ERROR: Self = Self { value: 0x0e };
    /// The attribute requires encryption before it can be read or written
    pub const INSUFFICIENT_ENCRYPTION: Self = Self { value: 0x0f };
    /// Insufficient Resources to complete the request
    pub const INSUFFICIENT_RESOURCES: Self = Self { value: 0x11 };
    /// First application error code, used by the transparent service for
    /// malformed profile writes
    pub const APPLICATION_ERROR: Self = Self { value: 0x80 };

    /// Wrap a raw error code
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self { value }
    }

    /// Raw error code
    #[must_use]
    pub const fn value(self) -> u8 {
        self.value
    }

    /// Whether the peer refused the request until the link is secured
    #[must_use]
    pub const fn is_security_error(self) -> bool {
        self.value == Self::INSUFFICIENT_AUTHENTICATION.value
            || self.value == Self::INSUFFICIENT_ENCRYPTION.value
    }
}

impl From<u8> for AttErrorCode {
    fn from(value: u8) -> Self {
        Self { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_errors() {
        assert!(AttErrorCode::INSUFFICIENT_AUTHENTICATION.is_security_error());
        assert!(AttErrorCode::INSUFFICIENT_ENCRYPTION.is_security_error());
        assert!(!AttErrorCode::ATTRIBUTE_NOT_FOUND.is_security_error());
        assert!(!AttErrorCode::from(0x0c).is_security_error());
    }
}
