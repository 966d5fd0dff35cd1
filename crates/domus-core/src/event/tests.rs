use super::*;

#[test]
fn only_dirty_and_operating_mode_events_are_sync_points() {
    assert!(EventKind::ModelDirty.is_sync_point());
    assert!(EventKind::OperatingModeChanged.is_sync_point());

    for kind in [
        EventKind::BusReady,
        EventKind::DeviceDiscovered,
        EventKind::DeviceLost,
        EventKind::MeterLost,
        EventKind::CallSceneOnDevice,
        EventKind::DeviceNeedsRepair,
        EventKind::Dummy,
        EventKind::Unsupported(42),
    ] {
        assert!(!kind.is_sync_point(), "{kind}");
    }
}

#[test]
fn unknown_codes_are_unsupported() {
    assert_eq!(EventKind::Unsupported(4711), EventKind::from_code(4711));
    assert_eq!(4711, EventKind::Unsupported(4711).code());
    assert_eq!(
        EventKind::DeviceNeedsRepair,
        EventKind::from_code(EventKind::DeviceNeedsRepair.code())
    );
}

#[test]
fn typed_param_access() {
    let event = Event::device_discovered(ZoneId(1), MeterId(2), DeviceId(3));
    assert_eq!(Ok(ZoneId(1)), event.zone_param(0));
    assert_eq!(Ok(MeterId(2)), event.meter_param(1));
    assert_eq!(Ok(DeviceId(3)), event.device_param(2));
    assert_eq!(
        Err(ParamError::Missing {
            kind: EventKind::DeviceDiscovered,
            index: 3
        }),
        event.device_param(3)
    );
    assert_eq!(
        Err(ParamError::Mismatch {
            kind: EventKind::DeviceDiscovered,
            index: 0,
            expected: "meter",
            actual: "zone",
        }),
        event.meter_param(0)
    );
}

#[test]
fn decode_scene_call_targets() {
    let device_target = AddressableTarget::Device(DeviceId(7));
    assert_eq!(
        Ok((device_target, SceneNumber(5))),
        Event::call_scene(device_target, SceneNumber(5)).addressable_target_param()
    );

    let group_target = AddressableTarget::Group {
        zone_id: ZoneId(1),
        group_id: GroupId(2),
    };
    assert_eq!(
        Ok((group_target, SceneNumber(0))),
        Event::call_scene(group_target, SceneNumber(0)).addressable_target_param()
    );

    let truncated = Event::new(EventKind::CallSceneOnDevice, [EventParam::Device(DeviceId(7))]);
    assert!(truncated.addressable_target_param().is_err());
}
