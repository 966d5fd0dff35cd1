//! Model mutations for the different kinds of events
//!
//! Handlers are invoked by the processor without holding the
//! queue lock. They may return a derived event that is appended
//! to the tail of the queue.

use thiserror::Error;

use crate::{
    bus::{self, BusInterface},
    event::{Event, ParamError},
    model::{self, DeviceSpec, RepairOutcome, SceneNumber},
    persistence::SharedModel,
};

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Model(#[from] model::Error),

    #[error(transparent)]
    Bus(#[from] bus::Error),
}

pub type HandlerResult = Result<Option<Event>, HandlerError>;

pub(super) fn on_bus_ready(model: &SharedModel) -> HandlerResult {
    model.write().set_bus_ready();
    Ok(None)
}

pub(super) fn on_device_discovered(
    model: &SharedModel,
    bus: &dyn BusInterface,
    event: &Event,
) -> HandlerResult {
    let zone_id = event.zone_param(0)?;
    let meter_id = event.meter_param(1)?;
    let device_id = event.device_param(2)?;
    // Query the bus before locking the model
    let spec = match bus.query_device(meter_id, device_id) {
        Ok(spec) => DeviceSpec { zone_id, ..spec },
        Err(err) => {
            log::warn!("Failed to query {device_id} on {meter_id}: {err}");
            DeviceSpec {
                name: String::new(),
                zone_id,
                groups: Default::default(),
            }
        }
    };
    model
        .write()
        .add_or_update_device(meter_id, device_id, spec);
    log::debug!("Discovered {device_id} on {meter_id} in {zone_id}");
    Ok(None)
}

pub(super) fn on_device_lost(model: &SharedModel, event: &Event) -> HandlerResult {
    let meter_id = event.meter_param(0)?;
    let device_id = event.device_param(1)?;
    model.write().mark_device_lost(device_id)?;
    log::debug!("Lost {device_id} on {meter_id}");
    Ok(None)
}

pub(super) fn on_meter_lost(model: &SharedModel, event: &Event) -> HandlerResult {
    let meter_id = event.meter_param(0)?;
    let lost_devices = model.write().mark_meter_lost(meter_id)?;
    log::debug!("Lost {meter_id} with {lost_devices} device(s)");
    Ok(None)
}

pub(super) fn on_call_scene(model: &SharedModel, event: &Event) -> HandlerResult {
    let (target, scene) = event.addressable_target_param()?;
    if scene > SceneNumber::MAX {
        return Err(model::Error::InvalidScene(scene).into());
    }
    model.write().addressable_mut(target)?.call_scene(scene);
    Ok(None)
}

pub(super) fn on_device_needs_repair(
    model: &SharedModel,
    bus: &dyn BusInterface,
    event: &Event,
) -> HandlerResult {
    let device_id = event.device_param(0)?;
    let (outcome, meter_id, zone_id) = {
        let mut model = model.write();
        let outcome = model.repair_device(device_id)?;
        let device = model
            .device(device_id)
            .ok_or(model::Error::UnknownDevice(device_id))?;
        (outcome, device.meter_id, device.zone_id)
    };
    if outcome == RepairOutcome::Repaired {
        log::info!("Repaired memberships of {device_id}");
        // The device itself might still be assigned to a different
        // zone. This is not critical for the model.
        if let Err(err) = bus.assign_zone(meter_id, device_id, zone_id) {
            log::warn!("Failed to assign {device_id} to {zone_id}: {err}");
        }
    }
    Ok(Some(Event::model_dirty()))
}
