//! Topology of an installation
//!
//! Zones own groups, devices are members of exactly one zone and
//! are attached to exactly one meter on the bus.
//!
//! The model is only ever mutated by the processor of the
//! [`ModelMaintenance`](crate::maintenance::ModelMaintenance)
//! engine. Other threads need to acquire a read lock.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod addressable;
pub use self::addressable::{Addressable, AddressableTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct ZoneId(pub u16);

impl ZoneId {
    /// The zone that contains all devices that have not been
    /// assigned to a dedicated zone yet
    pub const DEFAULT: Self = Self(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct GroupId(pub u8);

impl GroupId {
    /// Every zone has a broadcast group that addresses all its devices
    pub const BROADCAST: Self = Self(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct DeviceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct MeterId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct SceneNumber(pub u8);

impl SceneNumber {
    pub const OFF: Self = Self(0);
    pub const MAX: Self = Self(127);
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone#{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{:08x}", self.0)
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "meter#{:08x}", self.0)
    }
}

impl fmt::Display for SceneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown {0}")]
    UnknownZone(ZoneId),

    #[error("unknown {group} in {zone}")]
    UnknownGroup { zone: ZoneId, group: GroupId },

    #[error("unknown {0}")]
    UnknownDevice(DeviceId),

    #[error("unknown {0}")]
    UnknownMeter(MeterId),

    #[error("invalid {0}")]
    InvalidScene(SceneNumber),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Derived state of a zone
///
/// Recomputed from the current devices whenever the operating
/// mode of the installation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ZoneOperatingState {
    pub present_devices: usize,
    pub absent_devices: usize,
    pub last_called_scene: Option<SceneNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Zone {
    pub id: ZoneId,
    pub groups: BTreeMap<GroupId, Group>,
    pub devices: BTreeSet<DeviceId>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub operating_state: ZoneOperatingState,
}

impl Zone {
    #[must_use]
    pub fn new(id: ZoneId) -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(GroupId::BROADCAST, Group::new(id, GroupId::BROADCAST));
        Self {
            id,
            groups,
            devices: Default::default(),
            operating_state: Default::default(),
        }
    }

    fn ensure_group(&mut self, group_id: GroupId) -> &mut Group {
        let zone_id = self.id;
        self.groups
            .entry(group_id)
            .or_insert_with(|| Group::new(zone_id, group_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Group {
    pub zone_id: ZoneId,
    pub id: GroupId,
    pub last_called_scene: Option<SceneNumber>,
}

impl Group {
    #[must_use]
    pub const fn new(zone_id: ZoneId, id: GroupId) -> Self {
        Self {
            zone_id,
            id,
            last_called_scene: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub zone_id: ZoneId,
    pub meter_id: MeterId,
    pub groups: BTreeSet<GroupId>,
    pub present: bool,
    pub last_called_scene: Option<SceneNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Meter {
    pub id: MeterId,
    pub present: bool,
}

/// Structural information about a device as reported by the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub name: String,
    pub zone_id: ZoneId,
    pub groups: BTreeSet<GroupId>,
}

/// Outcome of [`Model::repair_device()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Nothing needed to be fixed
    Intact,

    /// Memberships have been fixed
    Repaired,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Model {
    zones: BTreeMap<ZoneId, Zone>,
    devices: BTreeMap<DeviceId, Device>,
    meters: BTreeMap<MeterId, Meter>,
    #[cfg_attr(feature = "serde", serde(skip))]
    bus_ready: bool,
}

impl Model {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(&id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    #[must_use]
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    #[must_use]
    pub fn meter(&self, id: MeterId) -> Option<&Meter> {
        self.meters.get(&id)
    }

    pub fn meters(&self) -> impl Iterator<Item = &Meter> {
        self.meters.values()
    }

    #[must_use]
    pub fn is_bus_ready(&self) -> bool {
        self.bus_ready
    }

    pub fn set_bus_ready(&mut self) {
        self.bus_ready = true;
    }

    /// Create an empty zone unless it already exists
    pub fn ensure_zone(&mut self, id: ZoneId) -> &mut Zone {
        self.zones.entry(id).or_insert_with(|| Zone::new(id))
    }

    /// Add a newly discovered device or refresh a known one
    ///
    /// The device is moved to the reported zone if it has been
    /// a member of a different zone before. The meter is marked
    /// as present.
    pub fn add_or_update_device(
        &mut self,
        meter_id: MeterId,
        device_id: DeviceId,
        spec: DeviceSpec,
    ) -> &Device {
        let DeviceSpec {
            name,
            zone_id,
            groups,
        } = spec;
        self.meters
            .entry(meter_id)
            .or_insert(Meter {
                id: meter_id,
                present: true,
            })
            .present = true;
        let previous_zone_id = self.devices.get(&device_id).map(|device| device.zone_id);
        if let Some(previous_zone_id) = previous_zone_id.filter(|id| *id != zone_id) {
            log::debug!("Moving {device_id} from {previous_zone_id} to {zone_id}");
            if let Some(zone) = self.zones.get_mut(&previous_zone_id) {
                zone.devices.remove(&device_id);
            }
        }
        let zone = self.ensure_zone(zone_id);
        zone.devices.insert(device_id);
        for group_id in &groups {
            zone.ensure_group(*group_id);
        }
        let device = self.devices.entry(device_id).or_insert_with(|| Device {
            id: device_id,
            name: String::new(),
            zone_id,
            meter_id,
            groups: BTreeSet::new(),
            present: true,
            last_called_scene: None,
        });
        device.name = name;
        device.zone_id = zone_id;
        device.meter_id = meter_id;
        device.groups = groups;
        device.present = true;
        device
    }

    /// Mark a device as absent
    ///
    /// The device and its memberships are retained.
    pub fn mark_device_lost(&mut self, device_id: DeviceId) -> Result<()> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(Error::UnknownDevice(device_id))?;
        device.present = false;
        Ok(())
    }

    /// Mark a meter and all devices attached to it as absent
    ///
    /// Returns the number of affected devices.
    pub fn mark_meter_lost(&mut self, meter_id: MeterId) -> Result<usize> {
        let meter = self
            .meters
            .get_mut(&meter_id)
            .ok_or(Error::UnknownMeter(meter_id))?;
        meter.present = false;
        let mut lost_devices = 0;
        for device in self
            .devices
            .values_mut()
            .filter(|device| device.meter_id == meter_id)
        {
            if device.present {
                device.present = false;
                lost_devices += 1;
            }
        }
        Ok(lost_devices)
    }

    /// Resolve a device or group for invoking actions on it
    pub fn addressable_mut(
        &mut self,
        target: AddressableTarget,
    ) -> Result<&mut dyn Addressable> {
        match target {
            AddressableTarget::Device(device_id) => self
                .devices
                .get_mut(&device_id)
                .map(|device| device as &mut dyn Addressable)
                .ok_or(Error::UnknownDevice(device_id)),
            AddressableTarget::Group { zone_id, group_id } => {
                let zone = self
                    .zones
                    .get_mut(&zone_id)
                    .ok_or(Error::UnknownZone(zone_id))?;
                zone.groups
                    .get_mut(&group_id)
                    .map(|group| group as &mut dyn Addressable)
                    .ok_or(Error::UnknownGroup {
                        zone: zone_id,
                        group: group_id,
                    })
            }
        }
    }

    /// Re-establish the membership invariants of a device
    ///
    /// A device must be listed in the device set of exactly the
    /// zone it refers to, and all its groups must exist in that zone.
    pub fn repair_device(&mut self, device_id: DeviceId) -> Result<RepairOutcome> {
        let device = self
            .devices
            .get(&device_id)
            .ok_or(Error::UnknownDevice(device_id))?;
        let zone_id = device.zone_id;
        let groups = device.groups.clone();
        let mut outcome = RepairOutcome::Intact;
        for zone in self.zones.values_mut().filter(|zone| zone.id != zone_id) {
            if zone.devices.remove(&device_id) {
                log::debug!("Removed stale membership of {device_id} in {}", zone.id);
                outcome = RepairOutcome::Repaired;
            }
        }
        if !self.zones.contains_key(&zone_id) {
            log::debug!("Recreating missing {zone_id} of {device_id}");
            outcome = RepairOutcome::Repaired;
        }
        let zone = self.ensure_zone(zone_id);
        if zone.devices.insert(device_id) {
            outcome = RepairOutcome::Repaired;
        }
        for group_id in groups {
            if !zone.groups.contains_key(&group_id) {
                zone.ensure_group(group_id);
                outcome = RepairOutcome::Repaired;
            }
        }
        Ok(outcome)
    }

    /// Recompute the derived operating state of all zones
    pub fn refresh_operating_state(&mut self) {
        let Self { zones, devices, .. } = self;
        for zone in zones.values_mut() {
            let (present_devices, absent_devices) = zone
                .devices
                .iter()
                .filter_map(|device_id| devices.get(device_id))
                .fold((0, 0), |(present, absent), device| {
                    if device.present {
                        (present + 1, absent)
                    } else {
                        (present, absent + 1)
                    }
                });
            let last_called_scene = zone
                .groups
                .get(&GroupId::BROADCAST)
                .and_then(|group| group.last_called_scene);
            zone.operating_state = ZoneOperatingState {
                present_devices,
                absent_devices,
                last_called_scene,
            };
        }
    }
}
