//! Synchronous requests to the device bus
//!
//! The transport is provided by the embedding application. Event
//! handlers of the engine use this interface for querying
//! structural details and for pushing corrections to devices.

use thiserror::Error;

use crate::model::{DeviceId, DeviceSpec, MeterId, ZoneId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("bus not available")]
    Unavailable,

    #[error("{0} did not respond")]
    NoResponse(MeterId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait BusInterface {
    /// Query the structural details of a device
    fn query_device(&self, meter_id: MeterId, device_id: DeviceId) -> Result<DeviceSpec>;

    /// Assign a device to a zone
    fn assign_zone(&self, meter_id: MeterId, device_id: DeviceId, zone_id: ZoneId) -> Result<()>;
}

/// Headless operation without a connected bus
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBus;

impl BusInterface for NoBus {
    fn query_device(&self, _meter_id: MeterId, _device_id: DeviceId) -> Result<DeviceSpec> {
        Err(Error::Unavailable)
    }

    fn assign_zone(
        &self,
        _meter_id: MeterId,
        _device_id: DeviceId,
        _zone_id: ZoneId,
    ) -> Result<()> {
        Err(Error::Unavailable)
    }
}

pub type BusInterfaceBoxed = Box<dyn BusInterface + Send + Sync + 'static>;

impl BusInterface for BusInterfaceBoxed {
    fn query_device(&self, meter_id: MeterId, device_id: DeviceId) -> Result<DeviceSpec> {
        (**self).query_device(meter_id, device_id)
    }

    fn assign_zone(&self, meter_id: MeterId, device_id: DeviceId, zone_id: ZoneId) -> Result<()> {
        (**self).assign_zone(meter_id, device_id, zone_id)
    }
}
