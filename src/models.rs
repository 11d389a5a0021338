use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Label shown for an appointment whose procedure record no longer resolves.
pub const FALLBACK_PROCEDURE_LABEL: &str = "Consultation";

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value {value:?}")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub value: String,
}

/// Position of a client in the sales and retention pipeline.
///
/// Variants are declared in rank order, so the derived `Ord` is the funnel
/// order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunnelStage {
    #[default]
    NewLead,
    FirstContact,
    EvaluationScheduled,
    ProcedureScheduled,
    RecurringCustomer,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 5] = [
        FunnelStage::NewLead,
        FunnelStage::FirstContact,
        FunnelStage::EvaluationScheduled,
        FunnelStage::ProcedureScheduled,
        FunnelStage::RecurringCustomer,
    ];

    pub fn rank(self) -> u8 {
        match self {
            FunnelStage::NewLead => 0,
            FunnelStage::FirstContact => 1,
            FunnelStage::EvaluationScheduled => 2,
            FunnelStage::ProcedureScheduled => 3,
            FunnelStage::RecurringCustomer => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FunnelStage::NewLead => "NEW_LEAD",
            FunnelStage::FirstContact => "FIRST_CONTACT",
            FunnelStage::EvaluationScheduled => "EVALUATION_SCHEDULED",
            FunnelStage::ProcedureScheduled => "PROCEDURE_SCHEDULED",
            FunnelStage::RecurringCustomer => "RECURRING_CUSTOMER",
        }
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunnelStage {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        FunnelStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == value)
            .ok_or_else(|| UnknownLabel {
                kind: "funnel stage",
                value: value.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    Canceled,
    Completed,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Canceled,
        AppointmentStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Canceled => "CANCELED",
            AppointmentStatus::Completed => "COMPLETED",
        }
    }

    /// Whether an appointment in this status occupies its slot.
    pub fn holds_slot(self) -> bool {
        self != AppointmentStatus::Canceled
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| UnknownLabel {
                kind: "appointment status",
                value: value.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Receptionist,
    Practitioner,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Receptionist => "RECEPTIONIST",
            Role::Practitioner => "PRACTITIONER",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [Role::Admin, Role::Receptionist, Role::Practitioner]
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| UnknownLabel {
                kind: "role",
                value: value.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    #[default]
    Info,
    Warning,
    Success,
    Error,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Info => "INFO",
            NotificationKind::Warning => "WARNING",
            NotificationKind::Success => "SUCCESS",
            NotificationKind::Error => "ERROR",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = UnknownLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [
            NotificationKind::Info,
            NotificationKind::Warning,
            NotificationKind::Success,
            NotificationKind::Error,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == value)
        .ok_or_else(|| UnknownLabel {
            kind: "notification type",
            value: value.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("time must be a zero-padded HH:MM slot token, got {0:?}")]
pub struct InvalidTimeSlot(String);

/// A bookable time token such as `"09:00"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot(String);

impl TimeSlot {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = InvalidTimeSlot;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let canonical = NaiveTime::parse_from_str(&value, "%H:%M")
            .map(|time| time.format("%H:%M").to_string() == value)
            .unwrap_or(false);
        if canonical {
            Ok(TimeSlot(value))
        } else {
            Err(InvalidTimeSlot(value))
        }
    }
}

impl FromStr for TimeSlot {
    type Err = InvalidTimeSlot;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TimeSlot::try_from(value.to_string())
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.0
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A (date, time, professional) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub date: NaiveDate,
    pub time: TimeSlot,
    pub professional_id: String,
}

impl Slot {
    /// True when `appointment` sits in this slot and still holds it.
    pub fn is_held_by(&self, appointment: &Appointment) -> bool {
        appointment.status.holds_slot()
            && appointment.date == self.date
            && appointment.time == self.time
            && appointment.professional_id == self.professional_id
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub cpf: Option<String>,
    pub funnel_stage: FunnelStage,
    pub interests: BTreeSet<String>,
    pub notes: Option<String>,
    pub last_interaction: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 40))]
    pub phone: String,
    #[validate(length(min = 1, max = 40))]
    pub cpf: Option<String>,
    pub funnel_stage: Option<FunnelStage>,
    #[serde(default)]
    pub interests: BTreeSet<String>,
    pub notes: Option<String>,
}

/// Partial update of a client. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientUpdate {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 40))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 40))]
    pub cpf: Option<String>,
    pub funnel_stage: Option<FunnelStage>,
    pub interests: Option<BTreeSet<String>>,
    pub notes: Option<String>,
}

impl ClientUpdate {
    pub fn apply(self, client: &mut Client, at: DateTime<Utc>) {
        if let Some(name) = self.name {
            client.name = name;
        }
        if let Some(email) = self.email {
            client.email = email;
        }
        if let Some(phone) = self.phone {
            client.phone = phone;
        }
        if let Some(cpf) = self.cpf {
            client.cpf = Some(cpf);
        }
        if let Some(stage) = self.funnel_stage {
            client.funnel_stage = stage;
        }
        if let Some(interests) = self.interests {
            client.interests = interests;
        }
        if let Some(notes) = self.notes {
            client.notes = Some(notes);
        }
        client.last_interaction = at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Minutes.
    pub duration: i64,
    /// Minor currency units.
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProcedure {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(range(min = 1, max = 1440))]
    pub duration: i64,
    #[validate(range(min = 0))]
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub client_id: String,
    pub professional_id: String,
    pub procedure_id: String,
    pub date: NaiveDate,
    pub time: TimeSlot,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn slot(&self) -> Slot {
        Slot {
            date: self.date,
            time: self.time.clone(),
            professional_id: self.professional_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    #[validate(length(min = 1))]
    pub client_id: String,
    #[validate(length(min = 1))]
    pub professional_id: String,
    #[validate(length(min = 1))]
    pub procedure_id: String,
    pub date: NaiveDate,
    pub time: TimeSlot,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl NewAppointment {
    pub fn slot(&self) -> Slot {
        Slot {
            date: self.date,
            time: self.time.clone(),
            professional_id: self.professional_id.clone(),
        }
    }

    pub fn initial_status(&self) -> AppointmentStatus {
        self.status.unwrap_or_default()
    }
}

/// Appointment joined with the display names the calendar and dashboard show.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub client_name: String,
    pub procedure: String,
    pub professional_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub read: bool,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    pub link: Option<String>,
}

/// Result of running a funnel trigger against one client.
#[derive(Debug, Clone)]
pub struct StageChange {
    pub client: Client,
    pub previous: FunnelStage,
    /// False when the trigger's guard skipped the write.
    pub written: bool,
}

impl StageChange {
    pub fn moved(&self) -> bool {
        self.written && self.previous != self.client.funnel_stage
    }
}

#[derive(Debug, Clone)]
pub struct Booking {
    pub appointment: Appointment,
    pub stage_change: Option<StageChange>,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub appointment: Appointment,
    pub previous: AppointmentStatus,
    pub stage_change: Option<StageChange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_follows_rank() {
        for pair in FunnelStage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].rank() + 1, pair[1].rank());
        }
    }

    #[test]
    fn stage_labels_parse_back() {
        for stage in FunnelStage::ALL {
            assert_eq!(stage.as_str().parse::<FunnelStage>().unwrap(), stage);
        }
        assert!("NOVO_LEAD".parse::<FunnelStage>().is_err());
    }

    #[test]
    fn time_slot_requires_canonical_token() {
        assert!("09:00".parse::<TimeSlot>().is_ok());
        assert!("23:59".parse::<TimeSlot>().is_ok());
        assert!("9:00".parse::<TimeSlot>().is_err());
        assert!("24:00".parse::<TimeSlot>().is_err());
        assert!("09:00:00".parse::<TimeSlot>().is_err());
        assert!("nine".parse::<TimeSlot>().is_err());
        // chrono tolerates padding spaces before numeric fields
        assert!(" 9:00".parse::<TimeSlot>().is_err());
        assert!("9: 00".parse::<TimeSlot>().is_err());
        assert!("09: 0".parse::<TimeSlot>().is_err());
        assert!("09:00 ".parse::<TimeSlot>().is_err());
    }

    #[test]
    fn appointment_json_uses_wire_labels() {
        let body = serde_json::json!({
            "clientId": "c1",
            "professionalId": "p1",
            "procedureId": "x1",
            "date": "2024-06-01",
            "time": "09:00",
            "status": "CONFIRMED"
        });
        let parsed: NewAppointment = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.initial_status(), AppointmentStatus::Confirmed);
        assert_eq!(parsed.time.as_str(), "09:00");

        let bad = serde_json::json!({
            "clientId": "c1",
            "professionalId": "p1",
            "procedureId": "x1",
            "date": "2024-06-01",
            "time": "9am"
        });
        assert!(serde_json::from_value::<NewAppointment>(bad).is_err());
    }

    #[test]
    fn canceled_appointments_release_their_slot() {
        let appointment = Appointment {
            id: "a1".into(),
            client_id: "c1".into(),
            professional_id: "p1".into(),
            procedure_id: "x1".into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            time: "09:00".parse().unwrap(),
            status: AppointmentStatus::Scheduled,
            notes: None,
            created_at: Utc::now(),
        };
        let slot = appointment.slot();
        assert!(slot.is_held_by(&appointment));

        let canceled = Appointment {
            status: AppointmentStatus::Canceled,
            ..appointment
        };
        assert!(!slot.is_held_by(&canceled));
    }
}
