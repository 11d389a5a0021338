use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    funnel::FunnelEngine,
    models::{Appointment, AppointmentStatus, Client, FunnelStage, StageChange, TimeSlot},
    scheduling::Scheduler,
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub scheduler: Scheduler,
    pub funnel: FunnelEngine,
    pub events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            scheduler: Scheduler::new(store.clone()),
            funnel: FunnelEngine::new(store.clone()),
            store,
            events,
        }
    }

    /// Sends to every open `/events` stream. Having no listeners is normal.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    /// Publishes a stage event only when the client actually moved.
    pub fn publish_stage_change(&self, change: Option<&StageChange>) {
        if let Some(change) = change.filter(|change| change.moved()) {
            self.publish(ServerEvent::stage_changed(change));
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    pub kind: &'static str,
    pub appointment_id: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub client_id: Option<String>,
    pub professional_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeSlot>,
    pub funnel_stage: Option<FunnelStage>,
}

impl ServerEvent {
    pub const APPOINTMENT_CREATED: &'static str = "appointment_created";
    pub const APPOINTMENT_UPDATED: &'static str = "appointment_updated";
    pub const FUNNEL_STAGE_CHANGED: &'static str = "funnel_stage_changed";

    pub fn appointment(kind: &'static str, appointment: &Appointment) -> Self {
        Self {
            kind,
            appointment_id: Some(appointment.id.clone()),
            status: Some(appointment.status),
            client_id: Some(appointment.client_id.clone()),
            professional_id: Some(appointment.professional_id.clone()),
            date: Some(appointment.date),
            time: Some(appointment.time.clone()),
            funnel_stage: None,
        }
    }

    pub fn stage_changed(change: &StageChange) -> Self {
        Self::client_stage(&change.client)
    }

    pub fn client_stage(client: &Client) -> Self {
        Self {
            kind: Self::FUNNEL_STAGE_CHANGED,
            appointment_id: None,
            status: None,
            client_id: Some(client.id.clone()),
            professional_id: None,
            date: None,
            time: None,
            funnel_stage: Some(client.funnel_stage),
        }
    }
}
