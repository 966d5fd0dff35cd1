use domus_core::persistence::SaveReport;

use super::State;

#[derive(Debug, Clone)]
pub enum Event {
    Lifecycle(LifecycleEvent),
    Notification(NotificationEvent),
    Incident(IncidentEvent),
}

/// Common lifecycle events
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Started,
    Stopped,
    StateChanged(State),
}

/// Regular notifications for informational purposes
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    ModelSaved(SaveReport),
}

/// Unexpected incidents that might require (manual) intervention
#[derive(Debug, Clone)]
pub enum IncidentEvent {
    ModelSaveFailed { message: String },
}
