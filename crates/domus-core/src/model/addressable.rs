use super::{Device, DeviceId, Group, GroupId, SceneNumber, ZoneId};

/// Entities that accept actions
pub trait Addressable {
    fn call_scene(&mut self, scene: SceneNumber);
}

impl Addressable for Device {
    fn call_scene(&mut self, scene: SceneNumber) {
        self.last_called_scene = Some(scene);
    }
}

impl Addressable for Group {
    fn call_scene(&mut self, scene: SceneNumber) {
        self.last_called_scene = Some(scene);
    }
}

/// Either a single device or a group of devices within a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressableTarget {
    Device(DeviceId),
    Group { zone_id: ZoneId, group_id: GroupId },
}
