//! The lead sequencer: one sweep evaluates all leads for a single step.

use crate::error::OutreachResult;
use crate::transport::OutreachTransport;
use easel_core::CampaignSchedule;
use easel_core::config::CampaignConfig;
use easel_metadata::models::LeadRow;
use easel_metadata::{LeadRepo, MetadataStore};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Tuning knobs for a sweep invocation.
#[derive(Clone, Debug)]
pub struct SweepOptions {
    /// Per-item send timeout.
    pub send_timeout: Duration,
    /// Maximum concurrent sends.
    pub max_concurrent_sends: usize,
    /// Per-step retry budget.
    pub max_step_attempts: u32,
    /// Maximum leads evaluated per invocation.
    pub batch_limit: u32,
}

impl SweepOptions {
    /// Derive sweep options from campaign configuration.
    pub fn from_campaign(config: &CampaignConfig) -> Self {
        Self {
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            max_concurrent_sends: config.max_concurrent_sends.max(1),
            max_step_attempts: config.max_step_attempts,
            batch_limit: config.sweep_batch_limit,
        }
    }
}

/// Aggregated result of one sweep invocation.
///
/// Per-item failures are counted here instead of aborting the batch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SweepStats {
    /// The campaign step this sweep evaluated.
    pub step: u32,
    /// Leads that met the eligibility criteria.
    pub evaluated: u64,
    /// Confirmed sends that advanced a lead.
    pub sent: u64,
    /// Failed or timed-out sends, retried on the next sweep.
    pub failed: u64,
    /// Sends overtaken by a purchase/unsubscribe while in flight.
    pub halted: u64,
}

enum ItemOutcome {
    Sent,
    Failed,
    Halted,
}

/// Run one sweep for a 1-based campaign step.
///
/// Each lead's transition commits independently, so aborting between items
/// cannot corrupt state. One slow or failing send never stalls the rest of
/// the batch: sends run concurrently (bounded) with a per-item timeout.
pub async fn run_sweep(
    step: u32,
    now: OffsetDateTime,
    metadata: Arc<dyn MetadataStore>,
    transport: Arc<dyn OutreachTransport>,
    schedule: &CampaignSchedule,
    opts: &SweepOptions,
) -> OutreachResult<SweepStats> {
    let delay = schedule.delay_for(step)?;
    let template = schedule.template_for(step)?.to_string();
    let anchor_cutoff = now - delay;

    let leads = metadata
        .get_sweepable_leads(step, anchor_cutoff, opts.max_step_attempts, opts.batch_limit)
        .await?;

    let mut stats = SweepStats {
        step,
        evaluated: leads.len() as u64,
        ..Default::default()
    };

    tracing::debug!(
        step = step,
        eligible = leads.len(),
        template = %template,
        "Sweep evaluating leads"
    );

    let outcomes = futures::stream::iter(leads.into_iter().map(|lead| {
        let metadata = metadata.clone();
        let transport = transport.clone();
        let template = template.clone();
        let send_timeout = opts.send_timeout;
        async move { process_lead(lead, step, &template, send_timeout, metadata, transport).await }
    }))
    .buffer_unordered(opts.max_concurrent_sends)
    .collect::<Vec<_>>()
    .await;

    for outcome in outcomes {
        match outcome {
            ItemOutcome::Sent => stats.sent += 1,
            ItemOutcome::Failed => stats.failed += 1,
            ItemOutcome::Halted => stats.halted += 1,
        }
    }

    tracing::info!(
        step = step,
        evaluated = stats.evaluated,
        sent = stats.sent,
        failed = stats.failed,
        halted = stats.halted,
        "Sweep completed"
    );
    Ok(stats)
}

/// Attempt one lead's send and commit the resulting transition.
///
/// Never propagates an error: every failure mode maps to an outcome so the
/// batch keeps going.
async fn process_lead(
    lead: LeadRow,
    step: u32,
    template: &str,
    send_timeout: Duration,
    metadata: Arc<dyn MetadataStore>,
    transport: Arc<dyn OutreachTransport>,
) -> ItemOutcome {
    let vars = match lead.context.as_deref() {
        Some(json) => serde_json::from_str::<serde_json::Value>(json).unwrap_or_else(|e| {
            tracing::warn!(email = %lead.email, error = %e, "Stored lead context is not valid JSON");
            serde_json::Value::Null
        }),
        None => serde_json::Value::Null,
    };

    let send = transport.send(&lead.email, template, step, &vars);
    let send_result = match tokio::time::timeout(send_timeout, send).await {
        Ok(result) => result,
        Err(_) => {
            let err = crate::error::OutreachError::Timeout(send_timeout);
            tracing::warn!(
                email = %lead.email,
                step = step,
                error = %err,
                "Outreach send timed out, will retry on next sweep"
            );
            record_failure(&metadata, &lead.email, step).await;
            return ItemOutcome::Failed;
        }
    };

    match send_result {
        Ok(()) => {
            match metadata
                .mark_step_sent(&lead.email, step, OffsetDateTime::now_utc())
                .await
            {
                Ok(true) => ItemOutcome::Sent,
                Ok(false) => {
                    // Purchase or unsubscribe overtook the in-flight send.
                    // The email went out, which is acceptable; no further
                    // step is ever attempted for this lead.
                    tracing::info!(
                        email = %lead.email,
                        step = step,
                        "Send overtaken by halt signal, lead excluded"
                    );
                    ItemOutcome::Halted
                }
                Err(e) => {
                    tracing::error!(
                        email = %lead.email,
                        step = step,
                        error = %e,
                        "Failed to record confirmed send"
                    );
                    ItemOutcome::Failed
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                email = %lead.email,
                step = step,
                error = %e,
                "Outreach send failed, will retry on next sweep"
            );
            record_failure(&metadata, &lead.email, step).await;
            ItemOutcome::Failed
        }
    }
}

async fn record_failure(metadata: &Arc<dyn MetadataStore>, email: &str, step: u32) {
    if let Err(e) = metadata
        .record_send_failure(email, step, OffsetDateTime::now_utc())
        .await
    {
        tracing::error!(email = %email, step = step, error = %e, "Failed to record send failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OutreachError;
    use async_trait::async_trait;
    use easel_metadata::SqliteStore;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use time::Duration as TimeDuration;

    /// Records sends; fails for configured recipients.
    struct MockTransport {
        sent: Mutex<Vec<(String, String, u32)>>,
        fail_for: Mutex<HashSet<String>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_for: Mutex::new(HashSet::new()),
            }
        }

        fn fail_for(&self, email: &str) {
            self.fail_for.lock().unwrap().insert(email.to_string());
        }

        fn recover(&self, email: &str) {
            self.fail_for.lock().unwrap().remove(email);
        }

        fn sent(&self) -> Vec<(String, String, u32)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutreachTransport for MockTransport {
        async fn send(
            &self,
            to_email: &str,
            template: &str,
            step: u32,
            _vars: &serde_json::Value,
        ) -> OutreachResult<()> {
            if self.fail_for.lock().unwrap().contains(to_email) {
                return Err(OutreachError::Delivery("mock failure".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to_email.to_string(), template.to_string(), step));
            Ok(())
        }

        fn transport_name(&self) -> &'static str {
            "mock"
        }
    }

    /// Simulates a purchase event arriving while the send is in flight.
    struct PurchaseDuringSendTransport {
        metadata: Arc<dyn MetadataStore>,
    }

    #[async_trait]
    impl OutreachTransport for PurchaseDuringSendTransport {
        async fn send(
            &self,
            to_email: &str,
            _template: &str,
            _step: u32,
            _vars: &serde_json::Value,
        ) -> OutreachResult<()> {
            self.metadata
                .record_purchase(to_email, OffsetDateTime::now_utc())
                .await
                .unwrap();
            Ok(())
        }

        fn transport_name(&self) -> &'static str {
            "purchase-during-send"
        }
    }

    async fn store() -> (tempfile::TempDir, Arc<dyn MetadataStore>) {
        let temp = tempdir().unwrap();
        let store = SqliteStore::new(temp.path().join("metadata.db"))
            .await
            .unwrap();
        (temp, Arc::new(store))
    }

    fn opts() -> SweepOptions {
        SweepOptions {
            send_timeout: Duration::from_secs(5),
            max_concurrent_sends: 4,
            max_step_attempts: 5,
            batch_limit: 100,
        }
    }

    async fn create_lead(metadata: &Arc<dyn MetadataStore>, email: &str) {
        metadata
            .upsert_lead_context(email, r#"{"flow":"upload","style":"oil"}"#, OffsetDateTime::now_utc())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn end_to_end_campaign_progression() {
        let (_temp, metadata) = store().await;
        let transport = Arc::new(MockTransport::new());
        let schedule = CampaignSchedule::default();
        let now = OffsetDateTime::now_utc();

        create_lead(&metadata, "ada@example.com").await;

        // Step 1 is due immediately.
        let stats = run_sweep(1, now, metadata.clone(), transport.clone(), &schedule, &opts())
            .await
            .unwrap();
        assert_eq!(stats.sent, 1);
        let lead = metadata.get_lead("ada@example.com").await.unwrap().unwrap();
        assert_eq!(lead.last_step_sent, 1);

        // Step 2 before its 24h delay elapses: no change.
        let stats = run_sweep(2, now, metadata.clone(), transport.clone(), &schedule, &opts())
            .await
            .unwrap();
        assert_eq!(stats.evaluated, 0);
        assert_eq!(stats.sent, 0);

        // Step 2 after the delay threshold: advances.
        let later = OffsetDateTime::now_utc() + TimeDuration::hours(25);
        let stats = run_sweep(2, later, metadata.clone(), transport.clone(), &schedule, &opts())
            .await
            .unwrap();
        assert_eq!(stats.sent, 1);
        let lead = metadata.get_lead("ada@example.com").await.unwrap().unwrap();
        assert_eq!(lead.last_step_sent, 2);

        // Purchase arrives; step 3 produces no send and no state change.
        metadata
            .record_purchase("ada@example.com", OffsetDateTime::now_utc())
            .await
            .unwrap();
        let much_later = OffsetDateTime::now_utc() + TimeDuration::hours(100);
        let stats = run_sweep(3, much_later, metadata.clone(), transport.clone(), &schedule, &opts())
            .await
            .unwrap();
        assert_eq!(stats.evaluated, 0);
        let lead = metadata.get_lead("ada@example.com").await.unwrap().unwrap();
        assert_eq!(lead.last_step_sent, 2);

        let sends = transport.sent();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].1, "welcome-back");
        assert_eq!(sends[1].1, "style-spotlight");
    }

    #[tokio::test]
    async fn steps_are_never_skipped() {
        let (_temp, metadata) = store().await;
        let transport = Arc::new(MockTransport::new());
        let schedule = CampaignSchedule::default();

        create_lead(&metadata, "bob@example.com").await;

        // The lead is at step 0; a step-2 sweep finds nothing.
        let later = OffsetDateTime::now_utc() + TimeDuration::hours(100);
        let stats = run_sweep(2, later, metadata.clone(), transport.clone(), &schedule, &opts())
            .await
            .unwrap();
        assert_eq!(stats.evaluated, 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn purchase_during_in_flight_send_halts_the_lead() {
        let (_temp, metadata) = store().await;
        let schedule = CampaignSchedule::default();
        let transport = Arc::new(PurchaseDuringSendTransport {
            metadata: metadata.clone(),
        });

        create_lead(&metadata, "carol@example.com").await;

        let stats = run_sweep(
            1,
            OffsetDateTime::now_utc(),
            metadata.clone(),
            transport,
            &schedule,
            &opts(),
        )
        .await
        .unwrap();

        assert_eq!(stats.halted, 1);
        assert_eq!(stats.sent, 0);

        // The in-flight send completed but the step never advanced, and the
        // lead is permanently out of the eligible set.
        let lead = metadata.get_lead("carol@example.com").await.unwrap().unwrap();
        assert_eq!(lead.last_step_sent, 0);
        assert!(lead.has_purchased);
    }

    #[tokio::test]
    async fn failed_sends_are_retried_on_the_next_sweep() {
        let (_temp, metadata) = store().await;
        let transport = Arc::new(MockTransport::new());
        let schedule = CampaignSchedule::default();

        create_lead(&metadata, "dan@example.com").await;
        create_lead(&metadata, "erin@example.com").await;
        transport.fail_for("dan@example.com");

        // One failure does not stop the other lead.
        let stats = run_sweep(
            1,
            OffsetDateTime::now_utc(),
            metadata.clone(),
            transport.clone(),
            &schedule,
            &opts(),
        )
        .await
        .unwrap();
        assert_eq!(stats.evaluated, 2);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);

        let dan = metadata.get_lead("dan@example.com").await.unwrap().unwrap();
        assert_eq!(dan.last_step_sent, 0);
        assert_eq!(dan.send_attempts, 1);

        // Transport recovers; the next sweep picks the lead back up.
        transport.recover("dan@example.com");
        let stats = run_sweep(
            1,
            OffsetDateTime::now_utc(),
            metadata.clone(),
            transport.clone(),
            &schedule,
            &opts(),
        )
        .await
        .unwrap();
        assert_eq!(stats.sent, 1);
        let dan = metadata.get_lead("dan@example.com").await.unwrap().unwrap();
        assert_eq!(dan.last_step_sent, 1);
        assert_eq!(dan.send_attempts, 0);
    }

    #[tokio::test]
    async fn retry_budget_bounds_failing_leads() {
        let (_temp, metadata) = store().await;
        let transport = Arc::new(MockTransport::new());
        let schedule = CampaignSchedule::default();
        let opts = SweepOptions {
            max_step_attempts: 2,
            ..opts()
        };

        create_lead(&metadata, "frank@example.com").await;
        transport.fail_for("frank@example.com");

        for _ in 0..2 {
            let stats = run_sweep(
                1,
                OffsetDateTime::now_utc(),
                metadata.clone(),
                transport.clone(),
                &schedule,
                &opts,
            )
            .await
            .unwrap();
            assert_eq!(stats.failed, 1);
        }

        // Budget exhausted: the lead stops being swept.
        let stats = run_sweep(
            1,
            OffsetDateTime::now_utc(),
            metadata.clone(),
            transport.clone(),
            &schedule,
            &opts,
        )
        .await
        .unwrap();
        assert_eq!(stats.evaluated, 0);
    }

    #[tokio::test]
    async fn unsubscribed_leads_are_excluded() {
        let (_temp, metadata) = store().await;
        let transport = Arc::new(MockTransport::new());
        let schedule = CampaignSchedule::default();

        create_lead(&metadata, "grace@example.com").await;
        metadata
            .record_unsubscribe("grace@example.com", OffsetDateTime::now_utc())
            .await
            .unwrap();

        let stats = run_sweep(
            1,
            OffsetDateTime::now_utc(),
            metadata.clone(),
            transport.clone(),
            &schedule,
            &opts(),
        )
        .await
        .unwrap();
        assert_eq!(stats.evaluated, 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn invalid_step_is_rejected() {
        let (_temp, metadata) = store().await;
        let transport = Arc::new(MockTransport::new());
        let schedule = CampaignSchedule::default();

        let err = run_sweep(
            7,
            OffsetDateTime::now_utc(),
            metadata,
            transport,
            &schedule,
            &opts(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OutreachError::Core(_)));
    }
}
