//! Accrual run driver.
//!
//! Candidate rows are grouped by loan and each loan is accrued, committed
//! and reported on its own. A failed loan never stops the run; the outcomes
//! are folded into a [`RunSummary`] and the run fails at the end if any loan
//! did.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use rand::Rng;
use tracing::{debug, error, info, instrument, warn};

use crate::accrual::accrue_loan;
use crate::config::{AccrualSettings, ConfigurationProvider};
use crate::decimal::Money;
use crate::errors::{AccrualError, Result};
use crate::events::{BusinessEventSink, LoanEvent};
use crate::schedule::LoanScheduleAccrualData;
use crate::store::{AccrualStore, JournalEntrySink, LoanAccrualCommit};
use crate::types::{LoanId, RunMode};

/// Group candidate rows by loan, keeping first-seen loan order and the
/// row order within each loan.
pub fn group_candidates_by_loan(
    rows: Vec<LoanScheduleAccrualData>,
) -> Vec<(LoanId, Vec<LoanScheduleAccrualData>)> {
    let mut index: HashMap<LoanId, usize> = HashMap::new();
    let mut groups: Vec<(LoanId, Vec<LoanScheduleAccrualData>)> = Vec::new();
    for row in rows {
        match index.entry(row.loan_id) {
            Entry::Occupied(slot) => groups[*slot.get()].1.push(row),
            Entry::Vacant(slot) => {
                slot.insert(groups.len());
                groups.push((row.loan_id, vec![row]));
            }
        }
    }
    groups
}

/// what one loan contributed to a run
#[derive(Debug, Clone, PartialEq)]
pub struct LoanAccrualSummary {
    pub loan_id: LoanId,
    pub transactions: usize,
    pub amount: Money,
    pub accrued_till: Option<NaiveDate>,
    pub attempts: u32,
}

pub type LoanOutcome = std::result::Result<LoanAccrualSummary, (LoanId, AccrualError)>;

/// per-loan outcomes of a run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: Vec<LoanAccrualSummary>,
    pub failed: Vec<(LoanId, AccrualError)>,
    /// loans skipped because the run was cancelled
    pub not_attempted: Vec<LoanId>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: LoanOutcome) {
        match outcome {
            Ok(summary) => self.succeeded.push(summary),
            Err(failure) => self.failed.push(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn transactions(&self) -> usize {
        self.succeeded.iter().map(|s| s.transactions).sum()
    }

    pub fn failed_loans(&self) -> Vec<LoanId> {
        self.failed.iter().map(|(loan_id, _)| *loan_id).collect()
    }

    /// the summary, or `RunFailed` when any loan failed
    pub fn into_result(self) -> Result<RunSummary> {
        if self.is_success() {
            return Ok(self);
        }
        Err(AccrualError::RunFailed {
            failed: self.failed.len(),
            messages: self
                .failed
                .iter()
                .map(|(loan_id, err)| format!("loan {loan_id}: {err}"))
                .collect(),
        })
    }
}

/// Drives accrual runs over a store.
///
/// Settings are snapshotted at the start of every run, from the
/// configuration provider when one is attached, and stay fixed for all
/// loans of that run.
pub struct AccrualBatch<'a> {
    store: &'a mut dyn AccrualStore,
    journal: &'a mut dyn JournalEntrySink,
    events: &'a mut dyn BusinessEventSink,
    provider: Option<&'a dyn ConfigurationProvider>,
    base: AccrualSettings,
    settings: AccrualSettings,
    time: SafeTimeProvider,
    cancelled: Arc<AtomicBool>,
}

impl<'a> AccrualBatch<'a> {
    pub fn new(
        store: &'a mut dyn AccrualStore,
        journal: &'a mut dyn JournalEntrySink,
        events: &'a mut dyn BusinessEventSink,
        settings: AccrualSettings,
        time: SafeTimeProvider,
    ) -> Self {
        Self {
            store,
            journal,
            events,
            provider: None,
            base: settings.clone(),
            settings,
            time,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// read policy and arrears mode from `provider` at the start of each run
    pub fn with_configuration(mut self, provider: &'a dyn ConfigurationProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// share a cancellation flag with the caller
    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Accrue every active loan the store offers for `mode`.
    ///
    /// Every loan is attempted; the run fails with `RunFailed` when any of
    /// them failed.
    #[instrument(name = "accrual.run", skip(self))]
    pub fn run(&mut self, mode: RunMode) -> Result<RunSummary> {
        self.refresh_settings()?;
        let business_date = self.time.now().date_naive();
        let rows = self.store.accrual_candidates(None, mode, business_date)?;
        self.accrue_loans(rows, mode).into_result()
    }

    /// Accrue the loans of already fetched candidate rows.
    #[instrument(name = "accrual.run_rows", skip_all, fields(rows = rows.len(), mode = ?mode))]
    pub fn run_rows(&mut self, rows: Vec<LoanScheduleAccrualData>, mode: RunMode) -> Result<RunSummary> {
        self.refresh_settings()?;
        self.accrue_loans(rows, mode).into_result()
    }

    pub fn settings(&self) -> &AccrualSettings {
        &self.settings
    }

    fn refresh_settings(&mut self) -> Result<()> {
        if let Some(provider) = self.provider {
            self.settings = AccrualSettings::snapshot(provider, &self.base)?;
            debug!(policy = %self.settings.policy, "settings snapshotted for run");
        }
        Ok(())
    }

    fn accrue_loans(&mut self, rows: Vec<LoanScheduleAccrualData>, mode: RunMode) -> RunSummary {
        let processing_date = self.time.now().date_naive();
        let groups = group_candidates_by_loan(rows);
        let mut summary = RunSummary::default();

        for (loan_id, loan_rows) in groups {
            if self.cancelled.load(Ordering::SeqCst) {
                summary.not_attempted.push(loan_id);
                continue;
            }
            let outcome = self
                .accrue_with_retry(loan_id, loan_rows, mode, processing_date)
                .map_err(|err| {
                    error!(loan_id, error = %err, "loan accrual failed");
                    (loan_id, err)
                });
            summary.record(outcome);
        }

        if !summary.not_attempted.is_empty() {
            warn!(skipped = summary.not_attempted.len(), "accrual run cancelled");
        }
        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            transactions = summary.transactions(),
            "accrual run finished"
        );
        summary
    }

    fn accrue_with_retry(
        &mut self,
        loan_id: LoanId,
        rows: Vec<LoanScheduleAccrualData>,
        mode: RunMode,
        processing_date: NaiveDate,
    ) -> Result<LoanAccrualSummary> {
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut rows = rows;
        let mut attempt = 1;

        loop {
            match self.accrue_once(loan_id, rows, mode, processing_date) {
                Ok(summary) => return Ok(LoanAccrualSummary { attempts: attempt, ..summary }),
                Err(err) if err.is_retryable() => {
                    if attempt >= max_attempts {
                        return Err(AccrualError::RetriesExhausted {
                            loan_id,
                            attempts: attempt,
                        });
                    }
                    warn!(loan_id, attempt, error = %err, "retrying loan accrual");
                    self.pause(attempt);
                    attempt += 1;
                    rows = self.store.accrual_candidates(Some(loan_id), mode, processing_date)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn accrue_once(
        &mut self,
        loan_id: LoanId,
        rows: Vec<LoanScheduleAccrualData>,
        mode: RunMode,
        processing_date: NaiveDate,
    ) -> Result<LoanAccrualSummary> {
        let snapshot = self.store.load_loan(loan_id)?;
        let version = snapshot.version;
        if !snapshot.status.is_active() {
            debug!(loan_id, status = ?snapshot.status, "loan no longer active");
            return Ok(LoanAccrualSummary {
                loan_id,
                transactions: 0,
                amount: Money::ZERO,
                accrued_till: None,
                attempts: 0,
            });
        }

        let input = snapshot.into_input(rows);
        let result = accrue_loan(&input, mode, &self.settings, processing_date)?;
        if result.is_empty() {
            debug!(loan_id, "nothing new to accrue");
            return Ok(LoanAccrualSummary {
                loan_id,
                transactions: 0,
                amount: Money::ZERO,
                accrued_till: None,
                attempts: 0,
            });
        }

        let commit = LoanAccrualCommit {
            loan_id,
            expected_version: version,
            result,
        };
        self.store.commit_accruals(&commit, &mut *self.journal)?;

        let result = commit.result;
        for posting in &result.postings {
            let transaction = &posting.transaction;
            self.events.publish(LoanEvent::AccrualTransactionCreated {
                loan_id,
                transaction_id: transaction.id,
                installment_number: posting.schedule_update.installment_number,
                amount: transaction.amount,
                transaction_date: transaction.transaction_date,
            });
        }
        if let Some(accrued_till) = result.accrued_till {
            self.events
                .publish(LoanEvent::AccruedTillAdvanced { loan_id, accrued_till });
        }

        let amount: Money = result.postings.iter().map(|p| p.transaction.amount).sum();
        debug!(loan_id, transactions = result.postings.len(), %amount, "loan accrued");
        Ok(LoanAccrualSummary {
            loan_id,
            transactions: result.postings.len(),
            amount,
            accrued_till: result.accrued_till,
            attempts: 0,
        })
    }

    fn pause(&self, attempt: u32) {
        let retry = &self.settings.retry;
        let jitter = if retry.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=retry.jitter_ms)
        } else {
            0
        };
        let delay = retry.backoff(attempt) + Duration::from_millis(jitter);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::decimal::CurrencyData;
    use crate::events::EventStore;
    use crate::store::{MemoryLoan, MemoryStore, RecordingJournal};
    use crate::types::LoanStatus;
    use chrono::{TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time_at(y: i32, m: u32, d: u32) -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(y, m, d, 6, 0, 0).unwrap()))
    }

    fn row(loan_id: LoanId, n: u32, from: NaiveDate, due: NaiveDate) -> LoanScheduleAccrualData {
        LoanScheduleAccrualData {
            loan_id,
            office_id: 1,
            loan_product_id: 1,
            repayment_schedule_id: loan_id * 100 + i64::from(n),
            installment_number: n,
            from_date: from,
            due_date: due,
            accrued_till: None,
            interest_calculated_from: None,
            interest_income: Some(Money::from_decimal(dec!(100.00))),
            accrued_interest_income: None,
            accrued_fee_income: None,
            accrued_penalty_income: None,
            waived_interest_income: None,
            credited_fee: None,
            credited_penalty: None,
            currency: CurrencyData::new("USD", 2),
        }
    }

    fn store(loan_ids: &[LoanId]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for &loan_id in loan_ids {
            let mut loan = MemoryLoan::new(loan_id, LoanStatus::Active);
            loan.schedule.push(row(loan_id, 1, date(2024, 1, 1), date(2024, 1, 31)));
            store.insert_loan(loan);
        }
        store
    }

    fn settings() -> AccrualSettings {
        AccrualSettings {
            retry: RetryPolicy::immediate(3),
            ..AccrualSettings::default()
        }
    }

    #[test]
    fn test_grouping_keeps_order() {
        let rows = vec![
            row(2, 1, date(2024, 1, 1), date(2024, 1, 31)),
            row(1, 1, date(2024, 1, 1), date(2024, 1, 31)),
            row(2, 2, date(2024, 1, 31), date(2024, 3, 1)),
        ];
        let groups = group_candidates_by_loan(rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, 2);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[0].1[1].installment_number, 2);
        assert_eq!(groups[1].0, 1);
    }

    #[test]
    fn test_grouping_many_interleaved_loans() {
        let rows: Vec<LoanScheduleAccrualData> = (1..=3)
            .flat_map(|n| (1..=500).map(move |loan_id| row(loan_id, n, date(2024, 1, 1), date(2024, 1, 31))))
            .collect();
        let groups = group_candidates_by_loan(rows);

        assert_eq!(groups.len(), 500);
        assert_eq!(groups[0].0, 1);
        assert_eq!(groups[499].0, 500);
        assert!(groups.iter().all(|(loan_id, loan_rows)| {
            loan_rows.len() == 3
                && loan_rows.iter().all(|r| r.loan_id == *loan_id)
                && loan_rows.iter().map(|r| r.installment_number).eq(1..=3)
        }));
    }

    #[test]
    fn test_run_accrues_each_loan_and_publishes() {
        let mut store = store(&[1, 2]);
        let mut journal = RecordingJournal::new();
        let mut events = EventStore::new();

        let summary = AccrualBatch::new(&mut store, &mut journal, &mut events, settings(), time_at(2024, 2, 1))
            .run(RunMode::AsOfToday)
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.transactions(), 2);
        assert_eq!(summary.succeeded[0].attempts, 1);
        assert_eq!(journal.entries().len(), 2);
        assert_eq!(events.events().len(), 4);
        assert_eq!(store.transactions().len(), 2);
    }

    #[test]
    fn test_failed_loan_fails_run_after_every_loan_is_attempted() {
        let mut store = store(&[1, 2, 3]);
        let mut journal = RecordingJournal::new().failing_for(2);
        let mut events = EventStore::new();

        let result = AccrualBatch::new(&mut store, &mut journal, &mut events, settings(), time_at(2024, 2, 1))
            .run(RunMode::AsOfToday);

        match result {
            Err(AccrualError::RunFailed { failed, messages }) => {
                assert_eq!(failed, 1);
                assert_eq!(messages.len(), 1);
                assert!(messages[0].starts_with("loan 2:"));
            }
            other => panic!("expected run failure, got {other:?}"),
        }

        // siblings stay committed
        assert!(store.transactions_for(2).is_empty());
        assert_eq!(store.transactions_for(1).len(), 1);
        assert_eq!(store.transactions_for(3).len(), 1);
        assert_eq!(journal.entries().len(), 2);
    }

    #[test]
    fn test_summary_folds_into_result() {
        let mut summary = RunSummary::default();
        summary.record(Ok(LoanAccrualSummary {
            loan_id: 1,
            transactions: 1,
            amount: Money::from_major(10),
            accrued_till: None,
            attempts: 1,
        }));
        assert!(summary.into_result().is_ok());

        let mut summary = RunSummary::default();
        summary.record(Err((4, AccrualError::LoanNotFound { loan_id: 4 })));
        summary.record(Err((5, AccrualError::LoanNotFound { loan_id: 5 })));
        assert_eq!(summary.failed_loans(), vec![4, 5]);
        assert!(matches!(
            summary.into_result(),
            Err(AccrualError::RunFailed { failed: 2, .. })
        ));
    }

    #[test]
    fn test_conflict_is_retried_with_fresh_snapshot() {
        let mut store = store(&[1]);
        store.inject_conflicts(1, 2);
        let mut journal = RecordingJournal::new();
        let mut events = EventStore::new();

        let summary = AccrualBatch::new(&mut store, &mut journal, &mut events, settings(), time_at(2024, 2, 1))
            .run(RunMode::AsOfToday)
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.succeeded[0].attempts, 3);
        assert_eq!(store.transactions().len(), 1);
    }

    #[test]
    fn test_retries_exhausted_counts_as_failure() {
        let mut store = store(&[1]);
        store.inject_conflicts(1, 5);
        let mut journal = RecordingJournal::new();
        let mut events = EventStore::new();

        let err = AccrualBatch::new(&mut store, &mut journal, &mut events, settings(), time_at(2024, 2, 1))
            .run(RunMode::AsOfToday)
            .unwrap_err();

        let exhausted = AccrualError::RetriesExhausted { loan_id: 1, attempts: 3 }.to_string();
        match err {
            AccrualError::RunFailed { failed, messages } => {
                assert_eq!(failed, 1);
                assert_eq!(messages, vec![format!("loan 1: {exhausted}")]);
            }
            other => panic!("expected run failure, got {other:?}"),
        }
        assert!(store.transactions().is_empty());
        assert!(events.events().is_empty());
    }

    #[test]
    fn test_cancelled_run_attempts_nothing() {
        let mut store = store(&[1, 2]);
        let mut journal = RecordingJournal::new();
        let mut events = EventStore::new();
        let flag = Arc::new(AtomicBool::new(true));

        let summary = AccrualBatch::new(&mut store, &mut journal, &mut events, settings(), time_at(2024, 2, 1))
            .with_cancellation(Arc::clone(&flag))
            .run(RunMode::AsOfToday)
            .unwrap();

        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.not_attempted, vec![1, 2]);
        assert!(store.transactions().is_empty());
    }

    struct FixedPolicy(&'static str);

    impl ConfigurationProvider for FixedPolicy {
        fn accrual_policy(&self) -> Result<crate::types::AccrualPolicy> {
            self.0.parse()
        }
    }

    #[test]
    fn test_run_snapshots_provider_settings() {
        let mut store = store(&[1]);
        let mut journal = RecordingJournal::new();
        let mut events = EventStore::new();
        let provider = FixedPolicy("submitted-date");

        let mut batch = AccrualBatch::new(&mut store, &mut journal, &mut events, settings(), time_at(2024, 2, 1))
            .with_configuration(&provider);
        batch.run(RunMode::AsOfToday).unwrap();
        assert_eq!(batch.settings().policy, crate::types::AccrualPolicy::SubmittedDate);
        assert_eq!(batch.settings().retry, RetryPolicy::immediate(3));
        drop(batch);

        // submitted-date postings carry the processing date
        assert_eq!(store.transactions()[0].transaction_date, date(2024, 2, 1));
    }

    #[test]
    fn test_bad_provider_value_stops_run_before_any_loan() {
        let mut store = store(&[1]);
        let mut journal = RecordingJournal::new();
        let mut events = EventStore::new();
        let provider = FixedPolicy("weekly");

        let err = AccrualBatch::new(&mut store, &mut journal, &mut events, settings(), time_at(2024, 2, 1))
            .with_configuration(&provider)
            .run(RunMode::AsOfToday)
            .unwrap_err();

        assert!(matches!(err, AccrualError::InvalidConfiguration { .. }));
        assert!(store.transactions().is_empty());
    }
}
