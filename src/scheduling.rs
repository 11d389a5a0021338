//! Appointment booking and lifecycle.
//!
//! The pre-flight slot check here only produces a friendly early refusal;
//! the authoritative check runs inside [`Store::book_appointment`].

use std::{collections::HashMap, sync::Arc};

use chrono::{NaiveDate, Utc};
use validator::Validate;

use crate::{
    error::ClinicError,
    models::{
        Appointment, AppointmentStatus, AppointmentView, Booking, Client, NewAppointment,
        NewNotification, NotificationKind, Slot, StatusChange, User, FALLBACK_PROCEDURE_LABEL,
    },
    store::{Store, StoreError},
};

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Advisory only: a concurrent booking may still take the slot.
    pub async fn is_slot_available(&self, slot: &Slot) -> Result<bool, ClinicError> {
        Ok(!self.store.slot_taken(slot).await?)
    }

    pub async fn create_appointment(&self, new: NewAppointment) -> Result<Booking, ClinicError> {
        new.validate()?;

        let client = self
            .store
            .get_client(&new.client_id)
            .await?
            .ok_or(ClinicError::NotFound("Client"))?;
        let professional = self
            .store
            .get_user(&new.professional_id)
            .await?
            .ok_or(ClinicError::NotFound("Professional"))?;
        self.store
            .get_procedure(&new.procedure_id)
            .await?
            .ok_or(ClinicError::NotFound("Procedure"))?;

        let slot = new.slot();
        if new.initial_status().holds_slot() && self.store.slot_taken(&slot).await? {
            log::warn!(
                "Rejected booking for {} on {} at {}: slot taken",
                slot.professional_id,
                slot.date,
                slot.time
            );
            return Err(ClinicError::SlotConflict);
        }

        let booking = match self.store.book_appointment(new, Utc::now()).await {
            Ok(booking) => booking,
            Err(StoreError::SlotTaken) => {
                log::warn!(
                    "Rejected booking for {} on {} at {}: lost the race for the slot",
                    slot.professional_id,
                    slot.date,
                    slot.time
                );
                return Err(ClinicError::SlotConflict);
            }
            Err(err) => return Err(err.into()),
        };

        let appointment = &booking.appointment;
        log::info!(
            "Booked appointment {} for client {} with {} on {} at {}",
            appointment.id,
            appointment.client_id,
            appointment.professional_id,
            appointment.date,
            appointment.time
        );
        if let Some(change) = booking.stage_change.as_ref().filter(|change| change.moved()) {
            log::info!(
                "Client {} moved from {} to {}",
                change.client.id,
                change.previous,
                change.client.funnel_stage
            );
        }

        self.notify_professional(appointment, &client, &professional).await;
        Ok(booking)
    }

    /// Best effort: the booking stands even when the notice cannot be stored.
    async fn notify_professional(&self, appointment: &Appointment, client: &Client, professional: &User) {
        let notice = NewNotification {
            user_id: professional.id.clone(),
            title: "New appointment".to_string(),
            description: format!(
                "{} booked for {} at {}",
                client.name, appointment.date, appointment.time
            ),
            kind: NotificationKind::Info,
            link: Some(format!("/appointments/{}", appointment.id)),
        };
        if let Err(err) = self.store.insert_notification(notice, Utc::now()).await {
            log::warn!(
                "Could not notify {} about appointment {}: {err}",
                professional.id,
                appointment.id
            );
        }
    }

    pub async fn update_status(&self, id: &str, status: AppointmentStatus) -> Result<StatusChange, ClinicError> {
        let change = self
            .store
            .set_appointment_status(id, status, Utc::now())
            .await?
            .ok_or(ClinicError::NotFound("Appointment"))?;
        log::info!(
            "Appointment {} went from {} to {}",
            id,
            change.previous,
            change.appointment.status
        );
        Ok(change)
    }

    pub async fn get_appointment(&self, id: &str) -> Result<Appointment, ClinicError> {
        self.store
            .get_appointment(id)
            .await?
            .ok_or(ClinicError::NotFound("Appointment"))
    }

    pub async fn list_views(&self) -> Result<Vec<AppointmentView>, ClinicError> {
        let appointments = self.store.list_appointments().await?;
        self.views(appointments).await
    }

    /// Enriched appointments with `from <= date <= to`.
    pub async fn views_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<AppointmentView>, ClinicError> {
        let appointments = self.store.appointments_between(from, to).await?;
        self.views(appointments).await
    }

    async fn views(&self, appointments: Vec<Appointment>) -> Result<Vec<AppointmentView>, ClinicError> {
        let clients = self
            .store
            .list_clients()
            .await?
            .into_iter()
            .map(|client| (client.id, client.name))
            .collect();
        let professionals = self
            .store
            .list_users()
            .await?
            .into_iter()
            .map(|user| (user.id, user.name))
            .collect();
        let procedures = self
            .store
            .list_procedures()
            .await?
            .into_iter()
            .map(|procedure| (procedure.id, procedure.name))
            .collect();
        Ok(enrich(appointments, &clients, &professionals, &procedures))
    }
}

/// Joins display names onto appointments. Rows whose client or professional
/// no longer resolves are dropped; a missing procedure gets the fallback
/// label.
pub fn enrich(
    appointments: Vec<Appointment>,
    clients: &HashMap<String, String>,
    professionals: &HashMap<String, String>,
    procedures: &HashMap<String, String>,
) -> Vec<AppointmentView> {
    let mut views: Vec<AppointmentView> = appointments
        .into_iter()
        .filter_map(|appointment| {
            let client_name = clients.get(&appointment.client_id)?.clone();
            let professional_name = professionals.get(&appointment.professional_id)?.clone();
            let procedure = procedures
                .get(&appointment.procedure_id)
                .cloned()
                .unwrap_or_else(|| FALLBACK_PROCEDURE_LABEL.to_string());
            Some(AppointmentView {
                appointment,
                client_name,
                procedure,
                professional_name,
            })
        })
        .collect();
    views.sort_by(|a, b| {
        (a.appointment.date, &a.appointment.time).cmp(&(b.appointment.date, &b.appointment.time))
    });
    views
}
