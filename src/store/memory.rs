use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use super::{new_id, Store, StoreError};
use crate::{
    funnel::{apply_trigger, FunnelTrigger},
    models::{
        Appointment, AppointmentStatus, Booking, Client, ClientUpdate, NewAppointment, NewClient,
        NewNotification, NewProcedure, NewUser, Notification, Procedure, Slot, StageChange,
        StatusChange, User,
    },
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    clients: Vec<Client>,
    procedures: Vec<Procedure>,
    appointments: Vec<Appointment>,
    notifications: Vec<Notification>,
}

impl Tables {
    fn slot_taken(&self, slot: &Slot, except: Option<&str>) -> bool {
        self.appointments
            .iter()
            .filter(|appointment| Some(appointment.id.as_str()) != except)
            .any(|appointment| slot.is_held_by(appointment))
    }

    fn fire(&mut self, client_id: &str, trigger: FunnelTrigger, at: DateTime<Utc>) -> Option<StageChange> {
        self.clients
            .iter_mut()
            .find(|client| client.id == client_id)
            .map(|client| apply_trigger(client, trigger, at))
    }
}

/// Process-local store. Every operation takes the single table lock, so
/// check-then-write sequences cannot interleave.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_by_slot(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| (a.date, &a.time).cmp(&(b.date, &b.time)));
}

fn newest_first(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, new: NewUser, at: DateTime<Utc>) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|user| user.username == new.username) {
            return Err(StoreError::Duplicate("username"));
        }
        let user = User {
            id: new_id(),
            username: new.username,
            name: new.name,
            role: new.role,
            password_hash: new.password_hash,
            created_at: at,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|user| user.username == username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.read().await.users.clone())
    }

    async fn insert_client(&self, new: NewClient, at: DateTime<Utc>) -> Result<Client, StoreError> {
        let client = Client {
            id: new_id(),
            name: new.name,
            email: new.email,
            phone: new.phone,
            cpf: new.cpf,
            funnel_stage: new.funnel_stage.unwrap_or_default(),
            interests: new.interests,
            notes: new.notes,
            last_interaction: at,
            created_at: at,
        };
        self.tables.write().await.clients.push(client.clone());
        Ok(client)
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.clients.iter().find(|client| client.id == id).cloned())
    }

    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        Ok(self.tables.read().await.clients.clone())
    }

    async fn update_client(
        &self,
        id: &str,
        update: ClientUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<Client>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(client) = tables.clients.iter_mut().find(|client| client.id == id) else {
            return Ok(None);
        };
        update.apply(client, at);
        Ok(Some(client.clone()))
    }

    async fn apply_funnel_trigger(
        &self,
        client_id: &str,
        trigger: FunnelTrigger,
        at: DateTime<Utc>,
    ) -> Result<Option<StageChange>, StoreError> {
        Ok(self.tables.write().await.fire(client_id, trigger, at))
    }

    async fn funnel_stage_labels(&self) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .clients
            .iter()
            .map(|client| client.funnel_stage.as_str().to_string())
            .collect())
    }

    async fn insert_procedure(&self, new: NewProcedure, at: DateTime<Utc>) -> Result<Procedure, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.procedures.iter().any(|procedure| procedure.name == new.name) {
            return Err(StoreError::Duplicate("procedure name"));
        }
        let procedure = Procedure {
            id: new_id(),
            name: new.name,
            description: new.description,
            duration: new.duration,
            price: new.price,
            created_at: at,
        };
        tables.procedures.push(procedure.clone());
        Ok(procedure)
    }

    async fn get_procedure(&self, id: &str) -> Result<Option<Procedure>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.procedures.iter().find(|procedure| procedure.id == id).cloned())
    }

    async fn list_procedures(&self) -> Result<Vec<Procedure>, StoreError> {
        Ok(self.tables.read().await.procedures.clone())
    }

    async fn slot_taken(&self, slot: &Slot) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.slot_taken(slot, None))
    }

    async fn book_appointment(&self, new: NewAppointment, at: DateTime<Utc>) -> Result<Booking, StoreError> {
        let mut tables = self.tables.write().await;
        let status = new.initial_status();
        if status.holds_slot() && tables.slot_taken(&new.slot(), None) {
            return Err(StoreError::SlotTaken);
        }

        let appointment = Appointment {
            id: new_id(),
            client_id: new.client_id,
            professional_id: new.professional_id,
            procedure_id: new.procedure_id,
            date: new.date,
            time: new.time,
            status,
            notes: new.notes,
            created_at: at,
        };
        tables.appointments.push(appointment.clone());
        let stage_change = tables.fire(&appointment.client_id, FunnelTrigger::Booked, at);

        Ok(Booking {
            appointment,
            stage_change,
        })
    }

    async fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .appointments
            .iter()
            .find(|appointment| appointment.id == id)
            .cloned())
    }

    async fn list_appointments(&self) -> Result<Vec<Appointment>, StoreError> {
        let mut appointments = self.tables.read().await.appointments.clone();
        sort_by_slot(&mut appointments);
        Ok(appointments)
    }

    async fn appointments_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .iter()
            .filter(|appointment| appointment.date >= from && appointment.date <= to)
            .cloned()
            .collect();
        sort_by_slot(&mut appointments);
        Ok(appointments)
    }

    async fn set_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<StatusChange>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(index) = tables.appointments.iter().position(|appointment| appointment.id == id) else {
            return Ok(None);
        };

        let previous = tables.appointments[index].status;
        if status.holds_slot()
            && !previous.holds_slot()
            && tables.slot_taken(&tables.appointments[index].slot(), Some(id))
        {
            return Err(StoreError::SlotTaken);
        }

        tables.appointments[index].status = status;
        let appointment = tables.appointments[index].clone();
        let stage_change = if status == AppointmentStatus::Completed {
            tables.fire(&appointment.client_id, FunnelTrigger::Completed, at)
        } else {
            None
        };

        Ok(Some(StatusChange {
            appointment,
            previous,
            stage_change,
        }))
    }

    async fn insert_notification(
        &self,
        new: NewNotification,
        at: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        let notification = Notification {
            id: new_id(),
            user_id: new.user_id,
            title: new.title,
            description: new.description,
            kind: new.kind,
            read: false,
            link: new.link,
            created_at: at,
        };
        self.tables.write().await.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn notifications_for_user(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        let tables = self.tables.read().await;
        let mut notifications: Vec<Notification> = tables
            .notifications
            .iter()
            .filter(|notification| notification.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut notifications);
        Ok(notifications)
    }

    async fn recent_notifications(&self, limit: usize) -> Result<Vec<Notification>, StoreError> {
        let mut notifications = self.tables.read().await.notifications.clone();
        newest_first(&mut notifications);
        notifications.truncate(limit);
        Ok(notifications)
    }

    async fn mark_notification_read(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .notifications
            .iter_mut()
            .find(|notification| notification.id == id)
            .map(|notification| {
                notification.read = true;
                notification.clone()
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FunnelStage, NotificationKind};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn booking_for(client_id: &str, date: NaiveDate, time: &str) -> NewAppointment {
        NewAppointment {
            client_id: client_id.into(),
            professional_id: "p1".into(),
            procedure_id: "x1".into(),
            date,
            time: time.parse().unwrap(),
            notes: None,
            status: None,
        }
    }

    async fn client(store: &MemoryStore, stage: Option<FunnelStage>) -> Client {
        store
            .insert_client(
                NewClient {
                    name: "Ana Costa".into(),
                    email: "ana@example.com".into(),
                    phone: "555-0102".into(),
                    funnel_stage: stage,
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn booking_conflict_leaves_tables_untouched() {
        let store = MemoryStore::new();
        let first = client(&store, None).await;
        let second = client(&store, Some(FunnelStage::FirstContact)).await;

        store
            .book_appointment(booking_for(&first.id, day(1), "09:00"), Utc::now())
            .await
            .unwrap();
        let err = store
            .book_appointment(booking_for(&second.id, day(1), "09:00"), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::SlotTaken));
        assert_eq!(store.list_appointments().await.unwrap().len(), 1);
        let second = store.get_client(&second.id).await.unwrap().unwrap();
        assert_eq!(second.funnel_stage, FunnelStage::FirstContact);
    }

    #[actix_web::test]
    async fn reviving_a_rebooked_slot_is_refused() {
        let store = MemoryStore::new();
        let owner = client(&store, None).await;
        let first = store
            .book_appointment(booking_for(&owner.id, day(2), "10:00"), Utc::now())
            .await
            .unwrap()
            .appointment;
        store
            .set_appointment_status(&first.id, AppointmentStatus::Canceled, Utc::now())
            .await
            .unwrap();
        store
            .book_appointment(booking_for(&owner.id, day(2), "10:00"), Utc::now())
            .await
            .unwrap();

        let err = store
            .set_appointment_status(&first.id, AppointmentStatus::Confirmed, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SlotTaken));
    }

    #[actix_web::test]
    async fn range_query_is_inclusive_and_ordered() {
        let store = MemoryStore::new();
        let owner = client(&store, None).await;
        for (date, time) in [(day(5), "09:00"), (day(3), "14:00"), (day(3), "09:30"), (day(9), "09:00")] {
            store
                .book_appointment(booking_for(&owner.id, date, time), Utc::now())
                .await
                .unwrap();
        }

        let found = store.appointments_between(day(3), day(5)).await.unwrap();
        let keys: Vec<(NaiveDate, &str)> = found.iter().map(|a| (a.date, a.time.as_str())).collect();
        assert_eq!(
            keys,
            vec![(day(3), "09:30"), (day(3), "14:00"), (day(5), "09:00")]
        );
    }

    #[actix_web::test]
    async fn notifications_are_listed_newest_first() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for offset in 0..12 {
            store
                .insert_notification(
                    NewNotification {
                        user_id: (if offset % 2 == 0 { "u1" } else { "u2" }).into(),
                        title: format!("n{offset}"),
                        description: "d".into(),
                        kind: NotificationKind::Info,
                        link: None,
                    },
                    base + chrono::Duration::seconds(offset),
                )
                .await
                .unwrap();
        }

        let recent = store.recent_notifications(10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].title, "n11");

        let mine = store.notifications_for_user("u1").await.unwrap();
        assert_eq!(mine.len(), 6);
        assert_eq!(mine[0].title, "n10");

        let read = store.mark_notification_read(&mine[0].id).await.unwrap().unwrap();
        assert!(read.read);
        assert!(store.mark_notification_read("missing").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn duplicate_names_are_rejected() {
        let store = MemoryStore::new();
        let procedure = NewProcedure {
            name: "Botox".into(),
            description: "Toxin".into(),
            duration: 60,
            price: 80_000,
        };
        store.insert_procedure(procedure.clone(), Utc::now()).await.unwrap();
        let err = store.insert_procedure(procedure, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }
}
