//! GATT Database Discovery
//!
//! Discovers a fixed set of remote services on every link, one ATT request at
//! a time. For each registered service the engine runs
//!
//! 1. primary service discovery by UUID over the whole handle range
//! 2. discovery of all characteristics within the service
//! 3. discovery of all descriptors within the service, when any wish-list entry
//!    asks for a descriptor
//!
//! and then moves on to the next registered service. Once the registry is
//! exhausted the link is `Done` and [`DiscoveryEvent::DiscoveryComplete`] is
//! raised.
//!
//! Two conditions pause a link without losing its place:
//!
//! * the stack refuses a request with `Busy`; the request is replayed on
//!   `ProtocolAvailable`
//! * the peer answers with insufficient authentication/encryption; the request
//!   is replayed once the link is encrypted
//!
//! ```text
//! Idle ──start──▶ Discovering(p) ──busy──▶ PausedBusy(p) ──protocol available──▶ Discovering(p)
//!                      │    └──security error──▶ PausedSecurity(p) ──encrypted──▶ Discovering(p)
//!                      └──registry exhausted──▶ Done
//! ```

pub mod engine;
pub mod registry;

pub use engine::{DiscoveryEngine, DiscoveryState, Procedure};
pub use registry::{CharacteristicResult, CharacteristicWish, DiscoveryRegistry, ServiceDescriptor};

use bt_hci::param::{ConnHandle, LeConnRole};

/// Discovery errors
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The registry or a wish-list is full
    CapacityExceeded,
    /// No discovery state exists for the connection handle
    InvalidHandle,
    /// The stack could not allocate what the first request needed
    OutOfResources,
}

/// Events raised by the discovery engine
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A link came up
    Connected {
        /// Connection handle
        conn: ConnHandle,
        /// Local role on the link
        role: LeConnRole,
    },
    /// A link went down; its discovery state is gone
    Disconnected {
        /// Connection handle
        conn: ConnHandle,
    },
    /// The peer refused a discovery request until the link is secured
    SecurityRequired {
        /// Connection handle
        conn: ConnHandle,
    },
    /// Every registered service has been processed
    DiscoveryComplete {
        /// Connection handle
        conn: ConnHandle,
    },
}

/// Options controlling when discovery starts on a new link
///
/// # Examples
///
/// ```rust
/// use wrenlink::DiscoveryOptions;
///
/// // Discover as central, but only once the link is encrypted
/// let options = DiscoveryOptions {
///     wait_for_security: true,
///     ..DiscoveryOptions::default()
/// };
/// assert!(options.init_disc_in_central);
/// ```
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Defer the start of discovery until the link is encrypted
    pub wait_for_security: bool,
    /// Start discovery on links where the local device is central
    pub init_disc_in_central: bool,
    /// Start discovery on links where the local device is peripheral
    pub init_disc_in_peripheral: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            wait_for_security: false,
            init_disc_in_central: true,
            init_disc_in_peripheral: false,
        }
    }
}

impl DiscoveryOptions {
    /// Whether discovery starts automatically for a link in `role`
    #[must_use]
    pub fn starts_in(&self, role: LeConnRole) -> bool {
        if matches!(role, LeConnRole::Central) {
            self.init_disc_in_central
        } else {
            self.init_disc_in_peripheral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = DiscoveryOptions::default();
        assert!(!options.wait_for_security);
        assert!(options.starts_in(LeConnRole::Central));
        assert!(!options.starts_in(LeConnRole::Peripheral));
    }
}
