//! Device registry
//!
//! Fixed-capacity, ordered collection of live devices. Owns every device
//! exclusively; a reaped device's slot is cleared, so a destroyed device
//! cannot be referenced at all. Instance numbers are assigned per type at
//! creation time from a monotonic per-type counter and stay stable for
//! the device's lifetime, even when earlier same-type devices are deleted.

use std::collections::HashMap;

use crate::protocol::commands::DeviceType;
use crate::{Error, Result};

use super::{AlpacaDevice, ConfiguredDevice};

/// Capacity of the registry. Exceeding it is a startup configuration
/// error, never a runtime fault.
pub const MAX_DEVICES: usize = 32;

#[derive(Default)]
pub struct DeviceRegistry {
    slots: Vec<Option<Box<dyn AlpacaDevice>>>,
    created_per_type: HashMap<DeviceType, u32>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { slots: Vec::new(), created_per_type: HashMap::new() }
    }

    /// Register a device, assigning its per-type instance number.
    ///
    /// Returns the assigned number.
    pub fn register(&mut self, mut device: Box<dyn AlpacaDevice>) -> Result<u32> {
        if self.slots.iter().filter(|s| s.is_some()).count() >= MAX_DEVICES {
            return Err(Error::RegistryFull { capacity: MAX_DEVICES });
        }
        let device_type = device.common().device_type;
        let counter = self.created_per_type.entry(device_type).or_insert(0);
        let number = *counter;
        *counter += 1;
        device.common_mut().device_number = number;

        // Reuse a cleared slot before growing the array
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => *slot = Some(device),
            None => self.slots.push(Some(device)),
        }
        Ok(number)
    }

    /// Look up a live device by (type, number). A negative number means
    /// "first match of type" for legacy callers. Devices flagged for
    /// deletion are invisible here, which makes delete-then-reap atomic
    /// with respect to dispatch.
    pub fn find_mut(
        &mut self,
        device_type: DeviceType,
        number: i32,
    ) -> Option<&mut Box<dyn AlpacaDevice>> {
        self.slots
            .iter_mut()
            .flatten()
            .filter(|d| !d.common().delete_pending)
            .find(|d| {
                d.common().device_type == device_type
                    && (number < 0 || d.common().device_number == number as u32)
            })
    }

    /// Iterate live, not-yet-reaped devices in registry order.
    pub fn iter_live_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn AlpacaDevice>> {
        self.slots.iter_mut().flatten().filter(|d| !d.common().delete_pending)
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &Box<dyn AlpacaDevice>> {
        self.slots.iter().flatten().filter(|d| !d.common().delete_pending)
    }

    /// Number of live devices.
    pub fn len(&self) -> usize {
        self.iter_live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_by_type(&self, device_type: DeviceType) -> usize {
        self.iter_live().filter(|d| d.common().device_type == device_type).count()
    }

    /// Snapshot for the management API and status pages.
    pub fn configured_devices(&self) -> Vec<ConfiguredDevice> {
        self.iter_live()
            .filter(|d| d.common().device_type != DeviceType::Management)
            .map(|d| d.common().configured_device())
            .collect()
    }

    /// Clear the slots of devices flagged for deletion, returning their
    /// names. Called by the scheduler at the end of a cycle only.
    pub fn reap(&mut self) -> Vec<String> {
        let mut reaped = Vec::new();
        for slot in &mut self.slots {
            if let Some(device) = slot {
                if device.common().delete_pending {
                    reaped.push(device.common().name.clone());
                    *slot = None;
                }
            }
        }
        reaped
    }

    /// Drop every remaining device in registry order; returns their names.
    pub fn clear(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        for slot in &mut self.slots {
            if let Some(device) = slot.take() {
                names.push(device.common().name.clone());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{SimFilterWheel, SimSwitch};

    fn wheel(name: &str) -> Box<dyn AlpacaDevice> {
        Box::new(SimFilterWheel::new(name))
    }

    fn switch(name: &str) -> Box<dyn AlpacaDevice> {
        Box::new(SimSwitch::new(name, 4))
    }

    #[test]
    fn test_instance_numbers_per_type_in_interleaved_order() {
        let mut reg = DeviceRegistry::new();
        assert_eq!(reg.register(wheel("fw0")).unwrap(), 0);
        assert_eq!(reg.register(switch("sw0")).unwrap(), 0);
        assert_eq!(reg.register(wheel("fw1")).unwrap(), 1);
        assert_eq!(reg.register(switch("sw1")).unwrap(), 1);
        assert_eq!(reg.register(wheel("fw2")).unwrap(), 2);
    }

    #[test]
    fn test_numbers_stable_after_deletion() {
        let mut reg = DeviceRegistry::new();
        reg.register(wheel("fw0")).unwrap();
        reg.register(wheel("fw1")).unwrap();

        reg.find_mut(DeviceType::Filterwheel, 0)
            .unwrap()
            .common_mut()
            .delete_pending = true;
        reg.reap();

        // A later creation must not reuse the deleted number 0
        assert_eq!(reg.register(wheel("fw2")).unwrap(), 2);
        assert!(reg.find_mut(DeviceType::Filterwheel, 0).is_none());
        assert!(reg.find_mut(DeviceType::Filterwheel, 1).is_some());
        assert!(reg.find_mut(DeviceType::Filterwheel, 2).is_some());
    }

    #[test]
    fn test_negative_number_finds_first_of_type() {
        let mut reg = DeviceRegistry::new();
        reg.register(switch("sw0")).unwrap();
        reg.register(wheel("fw0")).unwrap();
        let found = reg.find_mut(DeviceType::Filterwheel, -1).unwrap();
        assert_eq!(found.common().name, "fw0");
    }

    #[test]
    fn test_flagged_device_invisible_to_dispatch_lookup() {
        let mut reg = DeviceRegistry::new();
        reg.register(wheel("fw0")).unwrap();
        reg.find_mut(DeviceType::Filterwheel, 0)
            .unwrap()
            .common_mut()
            .delete_pending = true;

        // Not yet reaped, but lookups must already skip it
        assert!(reg.find_mut(DeviceType::Filterwheel, 0).is_none());
        assert_eq!(reg.len(), 0);

        let reaped = reg.reap();
        assert_eq!(reaped, vec!["fw0".to_string()]);
    }

    #[test]
    fn test_capacity_exhaustion_is_an_error() {
        let mut reg = DeviceRegistry::new();
        for i in 0..MAX_DEVICES {
            reg.register(switch(&format!("sw{}", i))).unwrap();
        }
        match reg.register(switch("overflow")) {
            Err(Error::RegistryFull { capacity }) => assert_eq!(capacity, MAX_DEVICES),
            other => panic!("expected RegistryFull, got {:?}", other.map(|_| ())),
        }
    }
}
