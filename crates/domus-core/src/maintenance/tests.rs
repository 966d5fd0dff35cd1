use std::thread;

use crate::{
    bus,
    counter::ProcessedCountValue,
    model::{AddressableTarget, DeviceId, DeviceSpec, GroupId, MeterId, SceneNumber, ZoneId},
    store::MemoryModelStore,
};

use super::*;

#[derive(Clone, Default)]
struct FakeBus {
    assigned_zones: Arc<Mutex<Vec<(DeviceId, ZoneId)>>>,
}

impl BusInterface for FakeBus {
    fn query_device(&self, _meter_id: MeterId, device_id: DeviceId) -> bus::Result<DeviceSpec> {
        Ok(DeviceSpec {
            name: format!("{device_id}"),
            zone_id: ZoneId::DEFAULT,
            groups: [GroupId(1)].into_iter().collect(),
        })
    }

    fn assign_zone(&self, _meter_id: MeterId, device_id: DeviceId, zone_id: ZoneId) -> bus::Result<()> {
        self.assigned_zones.lock().push((device_id, zone_id));
        Ok(())
    }
}

fn test_config() -> MaintenanceConfig {
    MaintenanceConfig {
        persistence: PersistenceConfig {
            // Flushing is not relevant for most tests
            quiet_window: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
        },
        ..Default::default()
    }
}

fn new_engine_with(
    config: MaintenanceConfig,
    store: Arc<MemoryModelStore>,
    bus: FakeBus,
) -> ModelMaintenance {
    ModelMaintenance::new(
        config,
        Environment {
            store,
            bus: Box::new(bus),
            persistence_events: None,
        },
    )
    .expect("engine created")
}

fn running_engine() -> ModelMaintenance {
    running_engine_with_config(test_config())
}

fn running_engine_with_config(config: MaintenanceConfig) -> ModelMaintenance {
    let engine = new_engine_with(config, Default::default(), Default::default());
    engine.initialize().expect("initialized");
    engine
}

fn enqueue_all(engine: &ModelMaintenance, events: impl IntoIterator<Item = Event>) {
    for event in events {
        engine.enqueue(event).expect("enqueued");
    }
}

fn drain(engine: &ModelMaintenance) -> usize {
    let mut processed = 0;
    while engine.process_one() {
        processed += 1;
    }
    processed
}

/// Spawn the processor for a single event
///
/// Returns after the event has been dequeued. The caller must hold
/// a read lock on the model to keep the event in flight.
fn process_one_in_background(engine: &Arc<ModelMaintenance>) -> thread::JoinHandle<bool> {
    let queue_len = engine.queue_len();
    assert!(queue_len > 0);
    let processor = thread::spawn({
        let engine = Arc::clone(engine);
        move || engine.process_one()
    });
    while engine.queue_len() >= queue_len {
        thread::sleep(Duration::from_millis(1));
    }
    processor
}

#[test]
fn empty_queue() {
    let engine = running_engine();
    let processed_count = engine.processed_count();

    assert!(!engine.process_one());
    assert_eq!(processed_count, engine.processed_count());
    assert_eq!(processed_count, engine.index_of_next_sync_state());
    assert!(engine.pending_changes_barrier(Duration::ZERO));
}

#[test]
fn reject_events_while_initializing() {
    let engine = new_engine_with(test_config(), Default::default(), Default::default());
    assert_eq!(State::Initializing, engine.state());

    let err = engine.enqueue(Event::model_dirty()).unwrap_err();
    assert!(matches!(err, EnqueueError::Initializing(_)));
    assert_eq!(Event::model_dirty(), err.into_event());
    assert_eq!(0, engine.queue_len());

    engine.initialize().unwrap();
    assert_eq!(State::Running, engine.state());
    assert!(engine.enqueue(Event::model_dirty()).is_ok());
}

#[test]
fn initialize_only_once() {
    let engine = running_engine();
    assert!(matches!(
        engine.initialize(),
        Err(InitializeError::AlreadyInitialized)
    ));
    engine.shutdown();
    assert!(matches!(engine.initialize(), Err(InitializeError::Terminated)));
}

#[test]
fn initialize_loads_model_from_store() {
    let mut saved_model = Model::new();
    saved_model.add_or_update_device(
        MeterId(1),
        DeviceId(10),
        DeviceSpec {
            name: "kitchen".to_owned(),
            zone_id: ZoneId(5),
            groups: Default::default(),
        },
    );
    let store = Arc::new(MemoryModelStore::new(Some(saved_model)));
    let engine = new_engine_with(test_config(), store, Default::default());

    engine.initialize().unwrap();

    let model = engine.model().read();
    assert_eq!("kitchen", model.device(DeviceId(10)).unwrap().name);
    assert_eq!(
        1,
        model.zone(ZoneId(5)).unwrap().operating_state.present_devices
    );
}

#[test]
fn process_each_enqueued_event_exactly_once() {
    let engine = running_engine();
    let processed_count = engine.processed_count();
    let events = [
        Event::dummy(),
        Event::model_dirty(),
        Event::bus_ready(),
        Event::operating_mode_changed(),
        Event::dummy(),
    ];
    let num_events = events.len();
    enqueue_all(&engine, events);
    assert_eq!(num_events, engine.queue_len());

    for _ in 0..num_events {
        assert!(engine.process_one());
    }
    assert!(!engine.process_one());

    assert_eq!(
        processed_count.advanced_by(num_events as ProcessedCountValue),
        engine.processed_count()
    );
    assert_eq!(0, engine.queue_len());
}

#[test]
fn adjacent_sync_points_are_processed_one_per_call() {
    let engine = running_engine();
    let processed_count = engine.processed_count();
    enqueue_all(&engine, [Event::model_dirty(), Event::model_dirty()]);

    assert!(engine.process_one());
    assert_eq!(processed_count.advanced_by(1), engine.processed_count());
    assert_eq!(1, engine.queue_len());
    assert!(!engine.pending_changes_barrier(Duration::ZERO));

    assert!(engine.process_one());
    assert_eq!(processed_count.advanced_by(2), engine.processed_count());
    assert!(engine.pending_changes_barrier(Duration::ZERO));

    assert!(!engine.process_one());

    // Only the last of both events has triggered a flush
    let statistics = engine.statistics();
    assert_eq!(1, statistics.coalesced_events);
    assert_eq!(1, statistics.persistence_triggers);
    assert!(engine.persistence().is_pending());
}

#[test]
fn coalesce_burst_of_operating_mode_changes() {
    let engine = running_engine();
    enqueue_all(
        &engine,
        [
            Event::operating_mode_changed(),
            Event::dummy(),
            Event::operating_mode_changed(),
            Event::model_dirty(),
            Event::operating_mode_changed(),
        ],
    );

    assert_eq!(5, drain(&engine));

    let statistics = engine.statistics();
    assert_eq!(2, statistics.coalesced_events);
    assert_eq!(1, statistics.operating_state_refreshes);
    // The single dirty event has not been followed by another one
    assert_eq!(1, statistics.persistence_triggers);
}

#[test]
fn index_of_next_sync_state_without_sync_points() {
    let engine = running_engine();
    enqueue_all(&engine, [Event::dummy(), Event::bus_ready(), Event::dummy()]);

    assert_eq!(engine.processed_count(), engine.index_of_next_sync_state());
    assert!(engine.pending_changes_barrier(Duration::ZERO));
}

#[test]
fn index_of_next_sync_state_is_the_last_sync_point() {
    let engine = running_engine();
    // Advance the baseline
    enqueue_all(&engine, [Event::dummy(), Event::dummy(), Event::dummy()]);
    assert_eq!(3, drain(&engine));
    let baseline = engine.processed_count();

    enqueue_all(
        &engine,
        [
            Event::dummy(),
            Event::dummy(),
            Event::dummy(),
            Event::model_dirty(),
            Event::dummy(),
            Event::dummy(),
            Event::model_dirty(),
            Event::dummy(),
            Event::dummy(),
            Event::dummy(),
        ],
    );
    assert_eq!(baseline.advanced_by(7), engine.index_of_next_sync_state());

    for _ in 1..=6 {
        assert!(engine.process_one());
        assert!(!engine.pending_changes_barrier(Duration::ZERO));
    }
    assert!(engine.process_one());
    assert!(engine.pending_changes_barrier(Duration::ZERO));
    assert_eq!(engine.processed_count(), engine.index_of_next_sync_state());
}

#[test]
fn index_of_next_sync_state_includes_the_event_in_flight() -> anyhow::Result<()> {
    let engine = Arc::new(running_engine());
    let baseline = engine.processed_count();
    enqueue_all(&engine, [Event::operating_mode_changed()]);

    let processor = {
        // Refreshing the operating state is blocked by this lock
        let _model = engine.model().read();
        let processor = process_one_in_background(&engine);

        assert_eq!(baseline, engine.processed_count());
        assert_eq!(baseline.advanced_by(1), engine.index_of_next_sync_state());
        assert!(!engine.pending_changes_barrier(Duration::ZERO));

        enqueue_all(
            &engine,
            [Event::dummy(), Event::model_dirty(), Event::dummy()],
        );
        assert_eq!(baseline.advanced_by(3), engine.index_of_next_sync_state());

        processor
    };

    assert!(processor
        .join()
        .map_err(|_| anyhow::anyhow!("processor panicked"))?);
    assert_eq!(baseline.advanced_by(1), engine.processed_count());
    assert!(!engine.pending_changes_barrier(Duration::ZERO));
    assert_eq!(3, drain(&engine));
    assert!(engine.pending_changes_barrier(Duration::ZERO));

    Ok(())
}

#[test]
fn processed_count_wraps_around() {
    let engine = running_engine_with_config(MaintenanceConfig {
        initial_processed_count: ProcessedCount::new(ProcessedCountValue::MAX - 2),
        ..test_config()
    });
    enqueue_all(
        &engine,
        [
            Event::dummy(),
            Event::model_dirty(),
            Event::dummy(),
            Event::operating_mode_changed(),
            Event::dummy(),
        ],
    );
    let target = engine.index_of_next_sync_state();
    assert_eq!(ProcessedCount::new(1), target);

    for _ in 0..3 {
        assert!(engine.process_one());
        assert!(!engine.pending_changes_barrier(Duration::ZERO));
    }
    assert!(engine.process_one());
    assert_eq!(target, engine.processed_count());
    assert!(engine.pending_changes_barrier(Duration::ZERO));

    assert!(engine.process_one());
    assert_eq!(ProcessedCount::new(2), engine.processed_count());
    assert!(!engine.process_one());
}

#[test]
fn barrier_is_not_extended_by_subsequent_events() -> anyhow::Result<()> {
    let engine = Arc::new(running_engine());
    enqueue_all(&engine, [Event::dummy(), Event::model_dirty()]);

    let waiter = thread::spawn({
        let engine = Arc::clone(&engine);
        move || engine.wait_for_pending_changes(Duration::from_secs(60))
    });
    // Let the waiter determine its target
    thread::sleep(Duration::from_millis(100));
    enqueue_all(&engine, [Event::dummy(), Event::model_dirty()]);

    assert!(engine.process_one());
    assert!(engine.process_one());
    let outcome = waiter
        .join()
        .map_err(|_| anyhow::anyhow!("waiter panicked"))?;
    assert_eq!(PendingChangesOutcome::Reached, outcome);

    // A new request needs to wait for the remaining sync point
    assert!(!engine.pending_changes_barrier(Duration::ZERO));
    assert_eq!(2, drain(&engine));
    assert!(engine.pending_changes_barrier(Duration::ZERO));

    Ok(())
}

#[test]
fn barrier_times_out() {
    let engine = running_engine();
    enqueue_all(&engine, [Event::model_dirty()]);

    let started = Instant::now();
    assert_eq!(
        PendingChangesOutcome::TimedOut,
        engine.wait_for_pending_changes(Duration::from_millis(50))
    );
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[test]
fn shutdown_releases_waiting_threads() -> anyhow::Result<()> {
    let engine = Arc::new(running_engine());
    enqueue_all(&engine, [Event::model_dirty()]);

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.wait_for_pending_changes(Duration::MAX))
        })
        .collect();
    thread::sleep(Duration::from_millis(100));

    engine.shutdown();

    for waiter in waiters {
        let outcome = waiter
            .join()
            .map_err(|_| anyhow::anyhow!("waiter panicked"))?;
        assert_eq!(PendingChangesOutcome::Terminated, outcome);
    }
    assert_eq!(State::Terminated, engine.state());
    assert!(matches!(
        engine.enqueue(Event::dummy()),
        Err(EnqueueError::Terminated(_))
    ));
    assert!(!engine.process_one());
    assert!(!engine.wait_for_events(Duration::MAX));

    Ok(())
}

#[test]
fn shutdown_flushes_pending_changes() {
    let store = Arc::new(MemoryModelStore::default());
    let engine = new_engine_with(test_config(), Arc::clone(&store), Default::default());
    engine.initialize().unwrap();
    enqueue_all(&engine, [Event::model_dirty()]);
    assert_eq!(1, drain(&engine));
    assert_eq!(0, store.save_count());

    engine.shutdown();

    assert_eq!(1, store.save_count());
}

#[test]
fn shutdown_saves_changes_of_coalesced_dirty_events() {
    let store = Arc::new(MemoryModelStore::default());
    let engine = new_engine_with(test_config(), Arc::clone(&store), Default::default());
    engine.initialize().unwrap();
    enqueue_all(
        &engine,
        [
            Event::device_discovered(ZoneId(1), MeterId(1), DeviceId(10)),
            Event::model_dirty(),
            Event::model_dirty(),
        ],
    );
    assert!(engine.process_one());
    assert!(engine.process_one());
    assert_eq!(1, engine.statistics().coalesced_events);
    assert_eq!(0, engine.statistics().persistence_triggers);
    assert!(!engine.persistence().is_pending());

    // The remaining dirty event is discarded
    engine.shutdown();

    assert_eq!(1, store.save_count());
    assert!(store
        .saved_model()
        .unwrap()
        .device(DeviceId(10))
        .is_some());
}

#[test]
fn shutdown_waits_for_the_event_in_flight() -> anyhow::Result<()> {
    let store = Arc::new(MemoryModelStore::default());
    let engine = Arc::new(new_engine_with(
        test_config(),
        Arc::clone(&store),
        Default::default(),
    ));
    engine.initialize()?;
    enqueue_all(
        &engine,
        [Event::device_discovered(ZoneId(1), MeterId(1), DeviceId(10))],
    );
    assert_eq!(1, drain(&engine));
    enqueue_all(&engine, [Event::device_needs_repair(DeviceId(10))]);

    let (processor, shutdown) = {
        // Repairing the device is blocked by this lock
        let _model = engine.model().read();
        let processor = process_one_in_background(&engine);
        let shutdown = thread::spawn({
            let engine = Arc::clone(&engine);
            move || engine.shutdown()
        });
        thread::sleep(Duration::from_millis(100));
        assert!(!shutdown.is_finished());
        assert_eq!(State::Terminated, engine.state());
        (processor, shutdown)
    };

    assert!(processor
        .join()
        .map_err(|_| anyhow::anyhow!("processor panicked"))?);
    shutdown
        .join()
        .map_err(|_| anyhow::anyhow!("shutdown panicked"))?;

    // The derived dirty event could not be enqueued anymore,
    // but the repaired model has been saved nevertheless
    assert_eq!(0, engine.queue_len());
    assert_eq!(1, store.save_count());

    Ok(())
}

#[test]
fn unsupported_events_are_counted_without_effect() {
    let engine = running_engine();
    let processed_count = engine.processed_count();
    enqueue_all(
        &engine,
        [Event::new(EventKind::from_code(4711), Vec::new()), Event::dummy()],
    );

    assert_eq!(2, drain(&engine));

    assert_eq!(processed_count.advanced_by(2), engine.processed_count());
    assert_eq!(1, engine.statistics().unsupported_events);
    assert_eq!(0, engine.statistics().failed_events);
}

#[test]
fn failing_handlers_do_not_stall_the_queue() {
    let engine = running_engine();
    enqueue_all(
        &engine,
        [
            Event::device_lost(MeterId(1), DeviceId(99)),
            Event::call_scene(
                AddressableTarget::Group {
                    zone_id: ZoneId(42),
                    group_id: GroupId::BROADCAST,
                },
                SceneNumber(5),
            ),
            Event::new(EventKind::MeterLost, Vec::new()),
            Event::device_discovered(ZoneId(1), MeterId(1), DeviceId(10)),
        ],
    );

    assert_eq!(4, drain(&engine));

    assert_eq!(3, engine.statistics().failed_events);
    assert!(engine.model().read().device(DeviceId(10)).is_some());
}

#[test]
fn apply_discovery_and_loss() {
    let engine = running_engine();
    enqueue_all(
        &engine,
        [
            Event::device_discovered(ZoneId(1), MeterId(1), DeviceId(10)),
            Event::device_discovered(ZoneId(2), MeterId(2), DeviceId(20)),
            Event::device_lost(MeterId(1), DeviceId(10)),
            Event::meter_lost(MeterId(2)),
            Event::call_scene(AddressableTarget::Device(DeviceId(20)), SceneNumber(17)),
        ],
    );

    assert_eq!(5, drain(&engine));
    assert_eq!(0, engine.statistics().failed_events);

    let model = engine.model().read();
    let device = model.device(DeviceId(10)).unwrap();
    assert_eq!(ZoneId(1), device.zone_id);
    assert_eq!(format!("{}", DeviceId(10)), device.name);
    assert!(!device.present);
    assert!(model.zone(ZoneId(1)).unwrap().groups.contains_key(&GroupId(1)));
    assert!(!model.meter(MeterId(2)).unwrap().present);
    let device = model.device(DeviceId(20)).unwrap();
    assert!(!device.present);
    assert_eq!(Some(SceneNumber(17)), device.last_called_scene);
}

#[test]
fn repaired_device_schedules_dirty_event_at_the_tail() {
    let bus = FakeBus::default();
    let engine = new_engine_with(test_config(), Default::default(), bus.clone());
    engine.initialize().unwrap();
    enqueue_all(
        &engine,
        [Event::device_discovered(ZoneId(3), MeterId(1), DeviceId(10))],
    );
    assert_eq!(1, drain(&engine));
    // Corrupt the model
    engine
        .model()
        .write()
        .ensure_zone(ZoneId(4))
        .devices
        .insert(DeviceId(10));

    enqueue_all(
        &engine,
        [Event::device_needs_repair(DeviceId(10)), Event::dummy()],
    );
    assert!(engine.process_one());
    assert_eq!(2, engine.queue_len());
    // The derived sync point is queued after the dummy event
    let processed_count = engine.processed_count();
    assert_eq!(processed_count.advanced_by(2), engine.index_of_next_sync_state());

    assert_eq!(2, drain(&engine));
    assert!(engine.pending_changes_barrier(Duration::ZERO));
    assert_eq!(1, engine.statistics().persistence_triggers);
    assert!(!engine
        .model()
        .read()
        .zone(ZoneId(4))
        .unwrap()
        .devices
        .contains(&DeviceId(10)));
    assert_eq!(vec![(DeviceId(10), ZoneId(3))], *bus.assigned_zones.lock());
}

#[test]
fn bus_ready_unblocks_waiting_threads() -> anyhow::Result<()> {
    let engine = Arc::new(running_engine());
    assert!(!engine.is_bus_ready());
    assert!(!engine.wait_for_bus_ready(Duration::ZERO));

    let waiter = thread::spawn({
        let engine = Arc::clone(&engine);
        move || engine.wait_for_bus_ready(Duration::from_secs(60))
    });
    enqueue_all(&engine, [Event::bus_ready()]);
    assert!(engine.process_one());

    assert!(waiter
        .join()
        .map_err(|_| anyhow::anyhow!("waiter panicked"))?);
    assert!(engine.is_bus_ready());
    assert!(engine.model().read().is_bus_ready());

    Ok(())
}

#[test]
fn wait_for_events_wakes_up_on_enqueue() -> anyhow::Result<()> {
    let engine = Arc::new(running_engine());
    assert!(!engine.wait_for_events(Duration::ZERO));

    let producer = thread::spawn({
        let engine = Arc::clone(&engine);
        move || {
            thread::sleep(Duration::from_millis(50));
            engine.enqueue(Event::dummy())
        }
    });

    assert!(engine.wait_for_events(Duration::from_secs(60)));
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer panicked"))??;

    Ok(())
}

#[test]
fn wait_for_events_times_out() {
    let engine = running_engine();
    let timeout = Duration::from_millis(50);
    let started = Instant::now();

    assert!(!engine.wait_for_events(timeout));

    assert!(started.elapsed() >= timeout);
}

#[test]
fn concurrent_producers() -> anyhow::Result<()> {
    const PRODUCERS: usize = 4;
    const EVENTS_PER_PRODUCER: usize = 1000;

    let engine = Arc::new(running_engine());
    let processed_count = engine.processed_count();
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for j in 0..EVENTS_PER_PRODUCER {
                    let event = if (i + j) % 10 == 0 {
                        Event::model_dirty()
                    } else {
                        Event::dummy()
                    };
                    engine.enqueue(event).expect("enqueued");
                }
            })
        })
        .collect();

    let mut processed = 0;
    while processed < PRODUCERS * EVENTS_PER_PRODUCER {
        if engine.process_one() {
            processed += 1;
        } else {
            engine.wait_for_events(Duration::from_millis(10));
        }
    }
    for producer in producers {
        producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer panicked"))?;
    }

    assert!(!engine.process_one());
    assert_eq!(
        processed_count.advanced_by((PRODUCERS * EVENTS_PER_PRODUCER) as ProcessedCountValue),
        engine.processed_count()
    );
    assert!(engine.pending_changes_barrier(Duration::ZERO));

    Ok(())
}
