use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::{
    error::ClinicError,
    models::{AppointmentView, FunnelStage, Notification},
    state::AppState,
};

const RECENT_NOTIFICATIONS: usize = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub today_appointments: Vec<AppointmentView>,
    pub last_week_appointments: Vec<AppointmentView>,
    pub clients_by_funnel_stage: BTreeMap<FunnelStage, u64>,
    pub recent_notifications: Vec<Notification>,
}

/// The week window is `[today - 7 days, today]`, both ends included.
pub async fn summarize(state: &AppState, today: NaiveDate) -> Result<DashboardSummary, ClinicError> {
    let week_start = today - Duration::days(7);
    let last_week_appointments = state.scheduler.views_between(week_start, today).await?;
    let today_appointments = last_week_appointments
        .iter()
        .filter(|view| view.appointment.date == today)
        .cloned()
        .collect();

    Ok(DashboardSummary {
        today_appointments,
        last_week_appointments,
        clients_by_funnel_stage: state.funnel.count_by_stage().await?,
        recent_notifications: state.store.recent_notifications(RECENT_NOTIFICATIONS).await?,
    })
}
