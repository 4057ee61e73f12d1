//! Discovery Registry
//!
//! Services the discovery engine looks for on every link, each with an ordered
//! wish-list of characteristics and descriptors. Results are stored per
//! service, per wish-list entry and per connection slot.

use heapless::Vec;

use super::DiscoveryError;
use crate::{
    constants::{MAX_CONNECTIONS, MAX_DISCOVERY_CHARACTERISTICS, MAX_DISCOVERY_SERVICES},
    stack::{CharacteristicDeclaration, DescriptorInfo},
    uuid::Uuid,
};

/// One entry of a service wish-list
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicWish {
    /// Characteristic or descriptor UUID
    pub uuid: Uuid,
    /// Entry is filled during descriptor discovery instead of characteristic discovery
    pub descriptor: bool,
}

impl CharacteristicWish {
    /// Wish for a characteristic
    #[must_use]
    pub const fn characteristic(uuid: Uuid) -> Self {
        Self {
            uuid,
            descriptor: false,
        }
    }

    /// Wish for a descriptor. Descriptors are reported with 16-bit UUIDs only.
    #[must_use]
    pub const fn descriptor(uuid: u16) -> Self {
        Self {
            uuid: Uuid::new_short(uuid),
            descriptor: true,
        }
    }
}

/// Discovered handles for one wish-list entry on one connection
///
/// A zeroed result means "not found". For descriptor entries only
/// `attr_handle` is set.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicResult {
    /// Characteristic declaration handle
    pub decl_handle: u16,
    /// Characteristic value handle, or descriptor handle
    pub attr_handle: u16,
    /// Characteristic properties
    pub properties: u8,
}

impl CharacteristicResult {
    /// Whether the entry was discovered
    #[must_use]
    pub const fn is_found(&self) -> bool {
        self.attr_handle != 0
    }
}

/// A service registered for discovery
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    uuid: Uuid,
    wishes: Vec<CharacteristicWish, MAX_DISCOVERY_CHARACTERISTICS>,
    results: [[CharacteristicResult; MAX_DISCOVERY_CHARACTERISTICS]; MAX_CONNECTIONS],
}

impl ServiceDescriptor {
    /// Describe a service and what to discover inside it
    ///
    /// # Errors
    /// Returns `DiscoveryError::CapacityExceeded` if `wishes` is longer than
    /// [`MAX_DISCOVERY_CHARACTERISTICS`].
    pub fn new(uuid: Uuid, wishes: &[CharacteristicWish]) -> Result<Self, DiscoveryError> {
        Ok(Self {
            uuid,
            wishes: Vec::from_slice(wishes).map_err(|()| DiscoveryError::CapacityExceeded)?,
            results: [[CharacteristicResult::default(); MAX_DISCOVERY_CHARACTERISTICS];
                MAX_CONNECTIONS],
        })
    }

    /// Service UUID
    #[must_use]
    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Ordered wish-list
    #[must_use]
    pub fn wishes(&self) -> &[CharacteristicWish] {
        &self.wishes
    }

    /// Whether any entry is filled by descriptor discovery
    #[must_use]
    pub fn needs_descriptor_discovery(&self) -> bool {
        self.wishes.iter().any(|wish| wish.descriptor)
    }

    /// Results of connection slot `slot`, one per wish-list entry
    #[must_use]
    pub fn results(&self, slot: usize) -> &[CharacteristicResult] {
        &self.results[slot][..self.wishes.len()]
    }

    pub(crate) fn clear_results(&mut self, slot: usize) {
        self.results[slot] = [CharacteristicResult::default(); MAX_DISCOVERY_CHARACTERISTICS];
    }

    /// Fill the first unfilled characteristic entry matching `decl`
    pub(crate) fn record_characteristic(
        &mut self,
        slot: usize,
        decl: &CharacteristicDeclaration,
    ) -> bool {
        let results = &mut self.results[slot];
        for (wish, result) in self.wishes.iter().zip(results.iter_mut()) {
            if !wish.descriptor && wish.uuid == decl.uuid && !result.is_found() {
                *result = CharacteristicResult {
                    decl_handle: decl.decl_handle,
                    attr_handle: decl.value_handle,
                    properties: decl.properties,
                };
                return true;
            }
        }
        false
    }

    /// Fill the first unfilled descriptor entry matching `desc`
    pub(crate) fn record_descriptor(&mut self, slot: usize, desc: &DescriptorInfo) -> bool {
        let uuid = Uuid::new_short(desc.uuid);
        let results = &mut self.results[slot];
        for (wish, result) in self.wishes.iter().zip(results.iter_mut()) {
            if wish.descriptor && wish.uuid == uuid && !result.is_found() {
                result.attr_handle = desc.handle;
                return true;
            }
        }
        false
    }
}

/// Ordered list of services to discover
#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    services: Vec<ServiceDescriptor, MAX_DISCOVERY_SERVICES>,
}

impl DiscoveryRegistry {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            services: Vec::new(),
        }
    }

    /// Append a service and return its index
    ///
    /// # Errors
    /// Returns `DiscoveryError::CapacityExceeded` past [`MAX_DISCOVERY_SERVICES`].
    pub fn register(&mut self, service: ServiceDescriptor) -> Result<usize, DiscoveryError> {
        self.services
            .push(service)
            .map_err(|_| DiscoveryError::CapacityExceeded)?;
        Ok(self.services.len() - 1)
    }

    /// Service at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ServiceDescriptor> {
        self.services.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut ServiceDescriptor> {
        self.services.get_mut(index)
    }

    /// Number of registered services
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn clear_results(&mut self, slot: usize) {
        for service in &mut self.services {
            service.clear_results(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVC: Uuid = Uuid::new_long(0x4953_5343_FE7D_4AE5_8FA9_9FAF_D205_E455);
    const CHR_A: Uuid = Uuid::new_short(0x2A37);
    const CHR_B: Uuid = Uuid::new_short(0x2A38);

    fn decl(decl_handle: u16, uuid: Uuid) -> CharacteristicDeclaration {
        CharacteristicDeclaration {
            decl_handle,
            properties: 0x10,
            value_handle: decl_handle + 1,
            uuid,
        }
    }

    #[test]
    fn test_registry_capacity() {
        let mut registry = DiscoveryRegistry::new();
        for i in 0..MAX_DISCOVERY_SERVICES {
            let svc = ServiceDescriptor::new(Uuid::new_short(0x1800 + i as u16), &[]).unwrap();
            assert_eq!(registry.register(svc), Ok(i));
        }
        let extra = ServiceDescriptor::new(Uuid::new_short(0x18FF), &[]).unwrap();
        assert_eq!(
            registry.register(extra),
            Err(DiscoveryError::CapacityExceeded)
        );
        assert_eq!(registry.len(), MAX_DISCOVERY_SERVICES);
    }

    #[test]
    fn test_wish_list_capacity() {
        let wishes = [CharacteristicWish::characteristic(CHR_A); MAX_DISCOVERY_CHARACTERISTICS + 1];
        assert_eq!(
            ServiceDescriptor::new(SVC, &wishes).map(|_| ()),
            Err(DiscoveryError::CapacityExceeded)
        );
    }

    #[test]
    fn test_characteristic_matching_skips_descriptor_entries() {
        let mut svc = ServiceDescriptor::new(
            SVC,
            &[
                CharacteristicWish::descriptor(0x2A37),
                CharacteristicWish::characteristic(CHR_A),
                CharacteristicWish::characteristic(CHR_B),
            ],
        )
        .unwrap();

        assert!(svc.record_characteristic(1, &decl(0x0010, CHR_A)));
        assert!(!svc.record_characteristic(1, &decl(0x0020, Uuid::new_short(0x2A99))));

        let results = svc.results(1);
        assert_eq!(results.len(), 3);
        assert!(!results[0].is_found());
        assert_eq!(results[1].decl_handle, 0x0010);
        assert_eq!(results[1].attr_handle, 0x0011);
        assert_eq!(results[1].properties, 0x10);
        assert!(!results[2].is_found());

        // Other slots are untouched.
        assert!(svc.results(0).iter().all(|r| !r.is_found()));
    }

    #[test]
    fn test_descriptor_fills_first_unset_entry() {
        let mut svc = ServiceDescriptor::new(
            SVC,
            &[
                CharacteristicWish::characteristic(CHR_A),
                CharacteristicWish::descriptor(0x2902),
                CharacteristicWish::characteristic(CHR_B),
                CharacteristicWish::descriptor(0x2902),
            ],
        )
        .unwrap();
        assert!(svc.needs_descriptor_discovery());

        let cccd = |handle| DescriptorInfo {
            handle,
            uuid: 0x2902,
        };
        assert!(svc.record_descriptor(0, &cccd(0x0013)));
        assert!(svc.record_descriptor(0, &cccd(0x0017)));
        assert!(!svc.record_descriptor(0, &cccd(0x001B)));

        let results = svc.results(0);
        assert_eq!(results[1].attr_handle, 0x0013);
        assert_eq!(results[3].attr_handle, 0x0017);
        assert!(!results[0].is_found());

        svc.clear_results(0);
        assert!(svc.results(0).iter().all(|r| !r.is_found()));
    }
}
