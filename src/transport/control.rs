//! Control Point Codec
//!
//! Every write to, and notification from, the Control characteristic starts
//! with a one byte opcode.
//!
//! | Opcode | Direction | Payload |
//! |---|---|---|
//! | `0x14` SERVER_ENABLED | peer to local | none |
//! | `0x14` acknowledgement | local to peer | `status = 0`, `0x14`, MTU (u16 big-endian), credit (u8) |
//! | `0x15` GIVE_CREDIT | both | credit (u8) |
//! | `0x20..=0xFF` vendor | both | opaque |
//!
//! Opcodes below `0x20` other than the two above are reserved.

use heapless::Vec;

use crate::att::AttErrorCode;

/// Peer enables credit based flow control of its writes
pub const CTRL_OP_SERVER_ENABLED: u8 = 0x14;
/// Credit grant
pub const CTRL_OP_GIVE_CREDIT: u8 = 0x15;
/// First vendor opcode
pub const CTRL_OP_VENDOR_MIN: u8 = 0x20;

/// Longest control notification sent by the engine itself
pub const MAX_CREDIT_GRANT_SIZE: usize = 5;

/// Decoded control point write
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand<'d> {
    /// `SERVER_ENABLED`
    ServerEnabled,
    /// `GIVE_CREDIT`
    GiveCredit(u8),
    /// Vendor opcode, full payload including the opcode
    Vendor(&'d [u8]),
    /// Reserved opcode with no defined meaning
    Reserved(u8),
}

impl<'d> ControlCommand<'d> {
    /// Decode a control point write
    ///
    /// # Errors
    /// `INVALID_ATTRIBUTE_VALUE_LENGTH` for an empty write or a
    /// `GIVE_CREDIT` without its credit byte.
    pub fn parse(data: &'d [u8]) -> Result<Self, AttErrorCode> {
        let (&opcode, payload) = data
            .split_first()
            .ok_or(AttErrorCode::INVALID_ATTRIBUTE_VALUE_LENGTH)?;
        match opcode {
            CTRL_OP_SERVER_ENABLED => Ok(Self::ServerEnabled),
            CTRL_OP_GIVE_CREDIT => payload
                .first()
                .map(|&credit| Self::GiveCredit(credit))
                .ok_or(AttErrorCode::INVALID_ATTRIBUTE_VALUE_LENGTH),
            CTRL_OP_VENDOR_MIN..=u8::MAX => Ok(Self::Vendor(data)),
            _ => Ok(Self::Reserved(opcode)),
        }
    }
}

/// Credit notification sent to the peer
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditGrant {
    /// Acknowledgement of `SERVER_ENABLED`
    ServerEnabled,
    /// Credits returned as the receive queue drains
    GiveCredit,
}

impl CreditGrant {
    /// Encode the grant for a link with ATT MTU `mtu`
    #[must_use]
    pub fn encode(self, mtu: u16, credit: u8) -> Vec<u8, MAX_CREDIT_GRANT_SIZE> {
        match self {
            Self::ServerEnabled => {
                let [hi, lo] = mtu.to_be_bytes();
                Vec::from_slice(&[0, CTRL_OP_SERVER_ENABLED, hi, lo, credit])
            }
            Self::GiveCredit => Vec::from_slice(&[CTRL_OP_GIVE_CREDIT, credit]),
        }
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opcodes() {
        assert_eq!(ControlCommand::parse(&[0x14]), Ok(ControlCommand::ServerEnabled));
        assert_eq!(
            ControlCommand::parse(&[0x15, 7]),
            Ok(ControlCommand::GiveCredit(7))
        );
        assert_eq!(
            ControlCommand::parse(&[0x20, 1, 2]),
            Ok(ControlCommand::Vendor(&[0x20, 1, 2]))
        );
        assert_eq!(ControlCommand::parse(&[0x13]), Ok(ControlCommand::Reserved(0x13)));
    }

    #[test]
    fn test_parse_malformed() {
        assert_eq!(
            ControlCommand::parse(&[]),
            Err(AttErrorCode::INVALID_ATTRIBUTE_VALUE_LENGTH)
        );
        assert_eq!(
            ControlCommand::parse(&[0x15]),
            Err(AttErrorCode::INVALID_ATTRIBUTE_VALUE_LENGTH)
        );
    }

    #[test]
    fn test_encode_grants() {
        assert_eq!(
            CreditGrant::ServerEnabled.encode(247, 16).as_slice(),
            &[0x00, 0x14, 0x00, 0xF7, 0x10]
        );
        assert_eq!(
            CreditGrant::ServerEnabled.encode(0x0102, 1).as_slice(),
            &[0x00, 0x14, 0x01, 0x02, 0x01]
        );
        assert_eq!(CreditGrant::GiveCredit.encode(23, 13).as_slice(), &[0x15, 13]);
    }
}
