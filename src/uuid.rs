//! UUID types.

/// A 16-bit or 128-bit UUID, stored little-endian as on the air.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Uuid {
    /// 16-bit UUID
    Uuid16([u8; 2]),
    /// 128-bit UUID
    Uuid128([u8; 16]),
}

impl From<u16> for Uuid {
    fn from(data: u16) -> Self {
        Uuid::Uuid16(data.to_le_bytes())
    }
}

impl From<u128> for Uuid {
    fn from(data: u128) -> Self {
        Uuid::Uuid128(data.to_le_bytes())
    }
}

impl From<[u8; 16]> for Uuid {
    fn from(data: [u8; 16]) -> Self {
        Uuid::Uuid128(data)
    }
}

impl Uuid {
    /// Create a new 16-bit UUID.
    #[must_use]
    pub const fn new_short(val: u16) -> Self {
        Self::Uuid16(val.to_le_bytes())
    }

    /// Create a new 128-bit UUID from its big-endian integer form.
    #[must_use]
    pub const fn new_long(val: u128) -> Self {
        Self::Uuid128(val.to_le_bytes())
    }

    /// The 16-bit value, if this is a short UUID.
    #[must_use]
    pub const fn as_short(&self) -> Option<u16> {
        match self {
            Uuid::Uuid16(data) => Some(u16::from_le_bytes(*data)),
            Uuid::Uuid128(_) => None,
        }
    }

    /// The little-endian bytes of the UUID.
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        match self {
            Uuid::Uuid16(uuid) => uuid,
            Uuid::Uuid128(uuid) => uuid,
        }
    }
}

impl TryFrom<&[u8]> for Uuid {
    type Error = crate::BleError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value.len() {
            2 => Ok(Uuid::Uuid16([value[0], value[1]])),
            16 => {
                let mut bytes = [0; 16];
                bytes.copy_from_slice(value);
                Ok(Uuid::Uuid128(bytes))
            }
            _ => Err(crate::BleError::InvalidParameter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid() {
        let uuid = Uuid::new_short(0x2902);
        assert_eq!(uuid.as_raw(), &[0x02, 0x29]);
        assert_eq!(uuid.as_short(), Some(0x2902));
        assert_eq!(Uuid::from(0x2902u16), uuid);
    }

    #[test]
    fn test_long_uuid_byte_order() {
        let uuid = Uuid::new_long(0x4953_5343_FE7D_4AE5_8FA9_9FAF_D205_E455);
        assert_eq!(uuid.as_raw()[0], 0x55);
        assert_eq!(uuid.as_raw()[15], 0x49);
        assert_eq!(uuid.as_short(), None);
    }

    #[test]
    fn test_uuid_from_slice() {
        assert_eq!(
            Uuid::try_from(&[0x03, 0x28][..]),
            Ok(Uuid::new_short(0x2803))
        );
        assert!(Uuid::try_from(&[0x03, 0x28, 0x00][..]).is_err());
    }
}
