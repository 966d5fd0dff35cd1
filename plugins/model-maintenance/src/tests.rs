use std::{sync::Arc, time::Duration};

use domus_core::{
    bus::NoBus,
    event::Event as ModelEvent,
    model::{DeviceId, MeterId, Model, ZoneId},
    persistence::PersistenceConfig,
    store::{self, MemoryModelStore, ModelStore},
};

use domus_plugin::PluginError;

use super::{
    api::{
        event::{IncidentEvent, LifecycleEvent, NotificationEvent},
        Controller, Event, PendingChangesOutcome, State,
    },
    *,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn test_setup() -> PluginSetup {
    let mut setup = PluginSetup::default();
    // Only flush when shutting down
    setup.config.persistence = PersistenceConfig {
        quiet_window: Duration::from_secs(3600),
        max_delay: Duration::from_secs(3600),
    };
    setup.config.idle_wait = Duration::from_millis(10);
    setup
}

fn start_plugin(store: SharedModelStore) -> anyhow::Result<(Controller, EventReceiver)> {
    let environment = Environment {
        event_publisher_index: EventPublisherIndex::from_value(1),
        store,
        bus: Box::new(NoBus),
    };
    let Plugin {
        ports,
        message_loop,
    } = create_plugin(environment, test_setup(), 16)?;
    let event_rx = ports.event_subscriber.subscribe();
    tokio::spawn(message_loop);
    Ok((Controller::new(ports.message_tx), event_rx))
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_and_await_pending_changes() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryModelStore::default());
    let (controller, mut event_rx) = start_plugin(Arc::clone(&store) as SharedModelStore)?;

    controller
        .command_enqueue(ModelEvent::device_discovered(
            ZoneId(1),
            MeterId(10),
            DeviceId(100),
        ))
        .await?;
    controller.command_enqueue(ModelEvent::model_dirty()).await?;
    assert_eq!(
        PendingChangesOutcome::Reached,
        controller.command_await_pending_changes(TIMEOUT).await?
    );

    let status = controller.query_status().await?;
    assert_eq!(State::Running, status.state);
    assert_eq!(2, status.processed_count.value());
    assert_eq!(status.processed_count, status.next_sync_state);
    assert_eq!(1, status.statistics.persistence_triggers);
    assert_eq!(0, status.model_save_count);

    controller.command_shutdown().await?;
    assert_eq!(1, store.save_count());
    let saved_model = store.saved_model().expect("saved");
    assert_eq!(Some(ZoneId(1)), saved_model.device(DeviceId(100)).map(|d| d.zone_id));

    assert!(matches!(
        event_rx.recv().await?.payload,
        Event::Lifecycle(LifecycleEvent::Started)
    ));
    match event_rx.recv().await?.payload {
        Event::Notification(NotificationEvent::ModelSaved(report)) => {
            assert_eq!(1, report.trigger_count);
        }
        unexpected => panic!("unexpected event: {unexpected:?}"),
    }
    assert!(matches!(
        event_rx.recv().await?.payload,
        Event::Lifecycle(LifecycleEvent::Stopped)
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn suspend_and_resume() -> anyhow::Result<()> {
    let store = Arc::new(MemoryModelStore::default());
    let (controller, mut event_rx) = start_plugin(store)?;

    controller.command_suspend().await?;
    // Suspending twice is accepted
    controller.command_suspend().await?;
    assert_eq!(State::Suspended, controller.query_status().await?.state);

    controller.command_enqueue(ModelEvent::model_dirty()).await?;
    controller.command_resume().await?;
    assert_eq!(
        PendingChangesOutcome::Reached,
        controller.command_await_pending_changes(TIMEOUT).await?
    );
    assert_eq!(State::Running, controller.query_status().await?.state);

    controller.command_shutdown().await?;

    assert!(matches!(
        event_rx.recv().await?.payload,
        Event::Lifecycle(LifecycleEvent::Started)
    ));
    assert!(matches!(
        event_rx.recv().await?.payload,
        Event::Lifecycle(LifecycleEvent::StateChanged(State::Suspended))
    ));
    assert!(matches!(
        event_rx.recv().await?.payload,
        Event::Lifecycle(LifecycleEvent::StateChanged(State::Running))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn no_communication_after_shutdown() -> anyhow::Result<()> {
    let store = Arc::new(MemoryModelStore::default());
    let (controller, _event_rx) = start_plugin(store)?;

    controller.command_shutdown().await?;

    let result = controller.command_enqueue(ModelEvent::dummy()).await;
    assert!(matches!(result, Err(PluginError::Communication)));
    Ok(())
}

struct FailingModelStore;

impl ModelStore for FailingModelStore {
    fn load(&self) -> store::Result<Option<Model>> {
        Ok(None)
    }

    fn save(&self, _model: &Model) -> store::Result<()> {
        Err(store::Error::Other(anyhow::anyhow!("disk full")))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn publish_incident_if_saving_fails() -> anyhow::Result<()> {
    let (controller, mut event_rx) = start_plugin(Arc::new(FailingModelStore))?;

    controller.command_enqueue(ModelEvent::model_dirty()).await?;
    assert_eq!(
        PendingChangesOutcome::Reached,
        controller.command_await_pending_changes(TIMEOUT).await?
    );
    controller.command_shutdown().await?;

    assert!(matches!(
        event_rx.recv().await?.payload,
        Event::Lifecycle(LifecycleEvent::Started)
    ));
    match event_rx.recv().await?.payload {
        Event::Incident(IncidentEvent::ModelSaveFailed { message }) => {
            assert!(message.contains("disk full"));
        }
        unexpected => panic!("unexpected event: {unexpected:?}"),
    }
    Ok(())
}
