//! Requests for mutating the model
//!
//! Events are immutable once created and are moved by value
//! from the producer into the queue and from the queue into
//! the processor.

use std::fmt;

use thiserror::Error;

use crate::model::{AddressableTarget, DeviceId, GroupId, MeterId, SceneNumber, ZoneId};

pub type EventKindCode = u16;

/// The type of a requested model mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The structure of the model changed and needs to be persisted
    ModelDirty,

    /// The derived operating state needs to be recomputed
    OperatingModeChanged,

    /// The bus is ready for structure queries
    BusReady,

    DeviceDiscovered,

    DeviceLost,

    MeterLost,

    CallSceneOnDevice,

    DeviceNeedsRepair,

    /// Does nothing
    ///
    /// Only used for testing.
    Dummy,

    /// An event code that the processor is not able to handle
    Unsupported(EventKindCode),
}

impl EventKind {
    pub const CODE_MODEL_DIRTY: EventKindCode = 1;
    pub const CODE_OPERATING_MODE_CHANGED: EventKindCode = 2;
    pub const CODE_BUS_READY: EventKindCode = 3;
    pub const CODE_DEVICE_DISCOVERED: EventKindCode = 4;
    pub const CODE_DEVICE_LOST: EventKindCode = 5;
    pub const CODE_METER_LOST: EventKindCode = 6;
    pub const CODE_CALL_SCENE_ON_DEVICE: EventKindCode = 7;
    pub const CODE_DEVICE_NEEDS_REPAIR: EventKindCode = 8;
    pub const CODE_DUMMY: EventKindCode = 0xffff;

    /// Map a raw code as received from a producer
    #[must_use]
    pub const fn from_code(code: EventKindCode) -> Self {
        match code {
            Self::CODE_MODEL_DIRTY => Self::ModelDirty,
            Self::CODE_OPERATING_MODE_CHANGED => Self::OperatingModeChanged,
            Self::CODE_BUS_READY => Self::BusReady,
            Self::CODE_DEVICE_DISCOVERED => Self::DeviceDiscovered,
            Self::CODE_DEVICE_LOST => Self::DeviceLost,
            Self::CODE_METER_LOST => Self::MeterLost,
            Self::CODE_CALL_SCENE_ON_DEVICE => Self::CallSceneOnDevice,
            Self::CODE_DEVICE_NEEDS_REPAIR => Self::DeviceNeedsRepair,
            Self::CODE_DUMMY => Self::Dummy,
            code => Self::Unsupported(code),
        }
    }

    #[must_use]
    pub const fn code(self) -> EventKindCode {
        match self {
            Self::ModelDirty => Self::CODE_MODEL_DIRTY,
            Self::OperatingModeChanged => Self::CODE_OPERATING_MODE_CHANGED,
            Self::BusReady => Self::CODE_BUS_READY,
            Self::DeviceDiscovered => Self::CODE_DEVICE_DISCOVERED,
            Self::DeviceLost => Self::CODE_DEVICE_LOST,
            Self::MeterLost => Self::CODE_METER_LOST,
            Self::CallSceneOnDevice => Self::CODE_CALL_SCENE_ON_DEVICE,
            Self::DeviceNeedsRepair => Self::CODE_DEVICE_NEEDS_REPAIR,
            Self::Dummy => Self::CODE_DUMMY,
            Self::Unsupported(code) => code,
        }
    }

    /// Check if events of this kind are synchronization points
    ///
    /// All mutations that precede a synchronization point are
    /// considered as applied and ready to be persisted once the
    /// synchronization point itself has been processed. Discovery
    /// events mutate the model immediately and don't need a barrier.
    #[must_use]
    pub const fn is_sync_point(self) -> bool {
        matches!(self, Self::ModelDirty | Self::OperatingModeChanged)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelDirty => f.write_str("model-dirty"),
            Self::OperatingModeChanged => f.write_str("operating-mode-changed"),
            Self::BusReady => f.write_str("bus-ready"),
            Self::DeviceDiscovered => f.write_str("device-discovered"),
            Self::DeviceLost => f.write_str("device-lost"),
            Self::MeterLost => f.write_str("meter-lost"),
            Self::CallSceneOnDevice => f.write_str("call-scene-on-device"),
            Self::DeviceNeedsRepair => f.write_str("device-needs-repair"),
            Self::Dummy => f.write_str("dummy"),
            Self::Unsupported(code) => write!(f, "unsupported({code})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventParam {
    Zone(ZoneId),
    Group(GroupId),
    Device(DeviceId),
    Meter(MeterId),
    Scene(SceneNumber),
}

impl EventParam {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Zone(_) => "zone",
            Self::Group(_) => "group",
            Self::Device(_) => "device",
            Self::Meter(_) => "meter",
            Self::Scene(_) => "scene",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("{kind} event is missing parameter #{index}")]
    Missing { kind: EventKind, index: usize },

    #[error("{kind} event expects a {expected} as parameter #{index} instead of a {actual}")]
    Mismatch {
        kind: EventKind,
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },
}

macro_rules! typed_param_accessor {
    ($fn_name:ident, $variant:ident, $value_type:ty, $type_name:literal) => {
        pub fn $fn_name(&self, index: usize) -> Result<$value_type, ParamError> {
            match self.param(index)? {
                EventParam::$variant(value) => Ok(*value),
                param => Err(ParamError::Mismatch {
                    kind: self.kind,
                    index,
                    expected: $type_name,
                    actual: param.type_name(),
                }),
            }
        }
    };
}

/// A requested model mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    params: Vec<EventParam>,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, params: impl Into<Vec<EventParam>>) -> Self {
        Self {
            kind,
            params: params.into(),
        }
    }

    #[must_use]
    pub fn model_dirty() -> Self {
        Self::new(EventKind::ModelDirty, Vec::new())
    }

    #[must_use]
    pub fn operating_mode_changed() -> Self {
        Self::new(EventKind::OperatingModeChanged, Vec::new())
    }

    #[must_use]
    pub fn bus_ready() -> Self {
        Self::new(EventKind::BusReady, Vec::new())
    }

    #[must_use]
    pub fn dummy() -> Self {
        Self::new(EventKind::Dummy, Vec::new())
    }

    #[must_use]
    pub fn device_discovered(zone_id: ZoneId, meter_id: MeterId, device_id: DeviceId) -> Self {
        Self::new(
            EventKind::DeviceDiscovered,
            [
                EventParam::Zone(zone_id),
                EventParam::Meter(meter_id),
                EventParam::Device(device_id),
            ],
        )
    }

    #[must_use]
    pub fn device_lost(meter_id: MeterId, device_id: DeviceId) -> Self {
        Self::new(
            EventKind::DeviceLost,
            [EventParam::Meter(meter_id), EventParam::Device(device_id)],
        )
    }

    #[must_use]
    pub fn meter_lost(meter_id: MeterId) -> Self {
        Self::new(EventKind::MeterLost, [EventParam::Meter(meter_id)])
    }

    /// Call a scene on either a device or a group
    ///
    /// Parameters: `[device, scene]` or `[zone, group, scene]`
    #[must_use]
    pub fn call_scene(target: AddressableTarget, scene: SceneNumber) -> Self {
        let params = match target {
            AddressableTarget::Device(device_id) => {
                vec![EventParam::Device(device_id), EventParam::Scene(scene)]
            }
            AddressableTarget::Group { zone_id, group_id } => vec![
                EventParam::Zone(zone_id),
                EventParam::Group(group_id),
                EventParam::Scene(scene),
            ],
        };
        Self::new(EventKind::CallSceneOnDevice, params)
    }

    #[must_use]
    pub fn device_needs_repair(device_id: DeviceId) -> Self {
        Self::new(EventKind::DeviceNeedsRepair, [EventParam::Device(device_id)])
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn params(&self) -> &[EventParam] {
        &self.params
    }

    #[must_use]
    pub fn is_sync_point(&self) -> bool {
        self.kind.is_sync_point()
    }

    pub fn param(&self, index: usize) -> Result<&EventParam, ParamError> {
        self.params.get(index).ok_or(ParamError::Missing {
            kind: self.kind,
            index,
        })
    }

    typed_param_accessor!(zone_param, Zone, ZoneId, "zone");
    typed_param_accessor!(group_param, Group, GroupId, "group");
    typed_param_accessor!(device_param, Device, DeviceId, "device");
    typed_param_accessor!(meter_param, Meter, MeterId, "meter");
    typed_param_accessor!(scene_param, Scene, SceneNumber, "scene");

    /// Decode the target of a scene call
    pub fn addressable_target_param(&self) -> Result<(AddressableTarget, SceneNumber), ParamError> {
        match self.param(0)? {
            EventParam::Device(device_id) => Ok((
                AddressableTarget::Device(*device_id),
                self.scene_param(1)?,
            )),
            _ => Ok((
                AddressableTarget::Group {
                    zone_id: self.zone_param(0)?,
                    group_id: self.group_param(1)?,
                },
                self.scene_param(2)?,
            )),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.kind, self.params)
    }
}

#[cfg(test)]
mod tests;
