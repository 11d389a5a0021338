//! Client pipeline stages and the triggers that move clients between them.
//!
//! The transition rules are pure functions over [`FunnelStage`]; both store
//! backends call [`apply_trigger`] inside their own atomic unit so a booking
//! and its stage advance commit together.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    error::ClinicError,
    models::{Client, FunnelStage, StageChange},
    store::Store,
};

/// Events that can move a client along the funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunnelTrigger {
    /// An appointment was booked for the client.
    Booked,
    /// One of the client's appointments was marked completed.
    Completed,
    /// Staff placed the client in a stage by hand.
    Manual(FunnelStage),
}

impl FunnelTrigger {
    /// The stage to write for a client currently at `current`, or `None`
    /// when the trigger leaves the client untouched.
    pub fn next_stage(self, current: FunnelStage) -> Option<FunnelStage> {
        match self {
            FunnelTrigger::Booked => {
                (current < FunnelStage::ProcedureScheduled).then_some(FunnelStage::ProcedureScheduled)
            }
            FunnelTrigger::Completed => Some(FunnelStage::RecurringCustomer),
            FunnelTrigger::Manual(stage) => Some(stage),
        }
    }
}

/// Runs `trigger` against `client` in place. `last_interaction` moves only
/// when a stage is written.
pub fn apply_trigger(client: &mut Client, trigger: FunnelTrigger, at: DateTime<Utc>) -> StageChange {
    let previous = client.funnel_stage;
    let written = match trigger.next_stage(previous) {
        Some(stage) => {
            client.funnel_stage = stage;
            client.last_interaction = at;
            true
        }
        None => false,
    };
    StageChange {
        client: client.clone(),
        previous,
        written,
    }
}

/// Tallies stored stage labels per stage. Every stage is present in the
/// result; labels that do not parse are skipped.
pub fn count_labels<I, S>(labels: I) -> BTreeMap<FunnelStage, u64>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: BTreeMap<FunnelStage, u64> =
        FunnelStage::ALL.into_iter().map(|stage| (stage, 0)).collect();
    for label in labels {
        match label.as_ref().parse::<FunnelStage>() {
            Ok(stage) => *counts.entry(stage).or_default() += 1,
            Err(err) => log::debug!("Skipping client with {err}"),
        }
    }
    counts
}

#[derive(Clone)]
pub struct FunnelEngine {
    store: Arc<dyn Store>,
}

impl FunnelEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Standalone booking advance, for bookings recorded outside
    /// [`Store::book_appointment`] such as imports. Regular bookings get the
    /// same transition inside the store's atomic unit.
    pub async fn advance_on_booking(&self, client_id: &str) -> Result<StageChange, ClinicError> {
        self.fire(client_id, FunnelTrigger::Booked).await
    }

    /// Standalone counterpart of the completion transition that
    /// [`Store::set_appointment_status`] applies.
    pub async fn advance_on_completion(&self, client_id: &str) -> Result<StageChange, ClinicError> {
        self.fire(client_id, FunnelTrigger::Completed).await
    }

    /// Manual override; may move a client backwards.
    pub async fn set_stage(&self, client_id: &str, stage: FunnelStage) -> Result<StageChange, ClinicError> {
        self.fire(client_id, FunnelTrigger::Manual(stage)).await
    }

    pub async fn count_by_stage(&self) -> Result<BTreeMap<FunnelStage, u64>, ClinicError> {
        let labels = self.store.funnel_stage_labels().await?;
        Ok(count_labels(labels))
    }

    async fn fire(&self, client_id: &str, trigger: FunnelTrigger) -> Result<StageChange, ClinicError> {
        let change = self
            .store
            .apply_funnel_trigger(client_id, trigger, Utc::now())
            .await?
            .ok_or(ClinicError::NotFound("Client"))?;
        if change.moved() {
            log::info!(
                "Client {} moved from {} to {}",
                client_id,
                change.previous,
                change.client.funnel_stage
            );
        }
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::NewClient, store::memory::MemoryStore};

    fn client_at(stage: FunnelStage) -> Client {
        let at = Utc::now() - chrono::Duration::days(3);
        Client {
            id: "c1".into(),
            name: "Maria Silva".into(),
            email: "maria@example.com".into(),
            phone: "555-0101".into(),
            cpf: None,
            funnel_stage: stage,
            interests: Default::default(),
            notes: None,
            last_interaction: at,
            created_at: at,
        }
    }

    #[test]
    fn booking_lifts_early_stages_to_procedure_scheduled() {
        for stage in [
            FunnelStage::NewLead,
            FunnelStage::FirstContact,
            FunnelStage::EvaluationScheduled,
        ] {
            assert_eq!(
                FunnelTrigger::Booked.next_stage(stage),
                Some(FunnelStage::ProcedureScheduled)
            );
        }
    }

    #[test]
    fn booking_never_regresses() {
        assert_eq!(FunnelTrigger::Booked.next_stage(FunnelStage::ProcedureScheduled), None);
        assert_eq!(FunnelTrigger::Booked.next_stage(FunnelStage::RecurringCustomer), None);
    }

    #[test]
    fn completion_always_writes_recurring() {
        for stage in FunnelStage::ALL {
            assert_eq!(
                FunnelTrigger::Completed.next_stage(stage),
                Some(FunnelStage::RecurringCustomer)
            );
        }
    }

    #[test]
    fn manual_set_can_move_backwards() {
        assert_eq!(
            FunnelTrigger::Manual(FunnelStage::FirstContact).next_stage(FunnelStage::RecurringCustomer),
            Some(FunnelStage::FirstContact)
        );
    }

    #[test]
    fn skipped_booking_keeps_last_interaction() {
        let mut client = client_at(FunnelStage::RecurringCustomer);
        let before = client.last_interaction;
        let change = apply_trigger(&mut client, FunnelTrigger::Booked, Utc::now());
        assert!(!change.written);
        assert!(!change.moved());
        assert_eq!(client.last_interaction, before);
        assert_eq!(client.funnel_stage, FunnelStage::RecurringCustomer);
    }

    #[test]
    fn repeated_completion_refreshes_last_interaction() {
        let mut client = client_at(FunnelStage::RecurringCustomer);
        let now = Utc::now();
        let change = apply_trigger(&mut client, FunnelTrigger::Completed, now);
        assert!(change.written);
        assert!(!change.moved());
        assert_eq!(client.last_interaction, now);
    }

    #[test]
    fn counting_ignores_unknown_labels() {
        let counts = count_labels(["NEW_LEAD", "NEW_LEAD", "RECURRING_CUSTOMER", "POS_VENDA", ""]);
        assert_eq!(counts.len(), 5);
        assert_eq!(counts[&FunnelStage::NewLead], 2);
        assert_eq!(counts[&FunnelStage::RecurringCustomer], 1);
        assert_eq!(counts[&FunnelStage::FirstContact], 0);
        assert_eq!(counts.values().sum::<u64>(), 3);
    }

    #[actix_web::test]
    async fn engine_counts_sum_to_client_total() {
        let store = Arc::new(MemoryStore::new());
        let engine = FunnelEngine::new(store.clone());
        for (name, stage) in [
            ("Ana", None),
            ("Bruno", Some(FunnelStage::FirstContact)),
            ("Carla", Some(FunnelStage::RecurringCustomer)),
        ] {
            store
                .insert_client(
                    NewClient {
                        name: name.into(),
                        email: format!("{}@example.com", name.to_lowercase()),
                        phone: "555-0100".into(),
                        funnel_stage: stage,
                        ..Default::default()
                    },
                    Utc::now(),
                )
                .await
                .unwrap();
        }

        let counts = engine.count_by_stage().await.unwrap();
        assert_eq!(counts.values().sum::<u64>(), 3);
        assert_eq!(counts[&FunnelStage::NewLead], 1);
    }

    async fn stored_client(store: &MemoryStore, stage: FunnelStage) -> Client {
        store
            .insert_client(
                NewClient {
                    name: "Maria Silva".into(),
                    email: "maria@example.com".into(),
                    phone: "555-0101".into(),
                    funnel_stage: Some(stage),
                    ..Default::default()
                },
                Utc::now() - chrono::Duration::days(3),
            )
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn manual_set_refreshes_last_interaction() {
        let store = Arc::new(MemoryStore::new());
        let engine = FunnelEngine::new(store.clone());
        let client = stored_client(&store, FunnelStage::FirstContact).await;

        let change = engine.set_stage(&client.id, FunnelStage::FirstContact).await.unwrap();
        assert!(change.written);
        assert!(!change.moved());

        let stored = store.get_client(&client.id).await.unwrap().unwrap();
        assert_eq!(stored.funnel_stage, FunnelStage::FirstContact);
        assert!(stored.last_interaction > client.last_interaction);
    }

    #[actix_web::test]
    async fn standalone_advances_follow_the_trigger_rules() {
        let store = Arc::new(MemoryStore::new());
        let engine = FunnelEngine::new(store.clone());
        let lead = stored_client(&store, FunnelStage::NewLead).await;
        let regular = stored_client(&store, FunnelStage::RecurringCustomer).await;

        let change = engine.advance_on_booking(&lead.id).await.unwrap();
        assert!(change.moved());
        assert_eq!(change.client.funnel_stage, FunnelStage::ProcedureScheduled);

        let change = engine.advance_on_booking(&regular.id).await.unwrap();
        assert!(!change.written);
        let stored = store.get_client(&regular.id).await.unwrap().unwrap();
        assert_eq!(stored.last_interaction, regular.last_interaction);

        let change = engine.advance_on_completion(&lead.id).await.unwrap();
        assert_eq!(change.previous, FunnelStage::ProcedureScheduled);
        assert_eq!(change.client.funnel_stage, FunnelStage::RecurringCustomer);
    }

    #[actix_web::test]
    async fn engine_reports_missing_clients() {
        let engine = FunnelEngine::new(Arc::new(MemoryStore::new()));
        let err = engine.advance_on_completion("nope").await.unwrap_err();
        assert!(matches!(err, ClinicError::NotFound(_)));
    }
}
