//! Entity store: the repository seam between the engines and persistence.
//!
//! Handlers and engines only ever see `Arc<dyn Store>`; `main` picks the
//! backend from configuration.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::{
    funnel::FunnelTrigger,
    models::{
        Appointment, AppointmentStatus, Booking, Client, ClientUpdate, NewAppointment, NewClient,
        NewNotification, NewProcedure, NewUser, Notification, Procedure, Slot, StageChange,
        StatusChange, User,
    },
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("slot already held by another appointment")]
    SlotTaken,

    #[error("duplicate {0}")]
    Duplicate(&'static str),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, new: NewUser, at: DateTime<Utc>) -> Result<User, StoreError>;
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn insert_client(&self, new: NewClient, at: DateTime<Utc>) -> Result<Client, StoreError>;
    async fn get_client(&self, id: &str) -> Result<Option<Client>, StoreError>;
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError>;
    async fn update_client(
        &self,
        id: &str,
        update: ClientUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<Client>, StoreError>;
    /// Reads the client's stage, applies `trigger`, and writes back only when
    /// the funnel rules call for a write. `None` when the client is unknown.
    async fn apply_funnel_trigger(
        &self,
        client_id: &str,
        trigger: FunnelTrigger,
        at: DateTime<Utc>,
    ) -> Result<Option<StageChange>, StoreError>;
    /// Raw stage labels of every client, unparsed.
    async fn funnel_stage_labels(&self) -> Result<Vec<String>, StoreError>;

    async fn insert_procedure(&self, new: NewProcedure, at: DateTime<Utc>) -> Result<Procedure, StoreError>;
    async fn get_procedure(&self, id: &str) -> Result<Option<Procedure>, StoreError>;
    async fn list_procedures(&self) -> Result<Vec<Procedure>, StoreError>;

    async fn slot_taken(&self, slot: &Slot) -> Result<bool, StoreError>;
    /// Inserts the appointment and runs [`FunnelTrigger::Booked`] for its
    /// client as one atomic unit. Fails with [`StoreError::SlotTaken`]
    /// without writing anything when an active appointment holds the slot.
    async fn book_appointment(&self, new: NewAppointment, at: DateTime<Utc>) -> Result<Booking, StoreError>;
    async fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, StoreError>;
    /// All appointments ordered by date and time.
    async fn list_appointments(&self) -> Result<Vec<Appointment>, StoreError>;
    /// Appointments with `from <= date <= to`, ordered by date and time.
    async fn appointments_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Appointment>, StoreError>;
    /// Overwrites the status and, when it becomes completed, runs
    /// [`FunnelTrigger::Completed`] in the same unit. Reviving a canceled
    /// appointment whose slot was re-booked fails with `SlotTaken`.
    async fn set_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, StoreError>;

    async fn insert_notification(
        &self,
        new: NewNotification,
        at: DateTime<Utc>,
    ) -> Result<Notification, StoreError>;
    /// Newest first.
    async fn notifications_for_user(&self, user_id: &str) -> Result<Vec<Notification>, StoreError>;
    /// Newest first, across all users.
    async fn recent_notifications(&self, limit: usize) -> Result<Vec<Notification>, StoreError>;
    async fn mark_notification_read(&self, id: &str) -> Result<Option<Notification>, StoreError>;
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
