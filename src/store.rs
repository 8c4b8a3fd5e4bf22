//! Persistence boundary.
//!
//! The engine reads loan data and writes accrual results through the
//! [`AccrualStore`] and [`ArrearsStore`] traits. [`MemoryStore`] implements
//! both in process, with optimistic versions and all-or-nothing commits.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::accrual::{AccountingBridgeData, AccrualTransaction, ChargePaidBy, LoanAccrualInput, LoanAccrualResult};
use crate::arrears::{ArrearsChange, ArrearsRow, LoanArrearsProfile, LoanRepaymentTotals};
use crate::charges::LoanChargeData;
use crate::errors::{AccrualError, Result};
use crate::schedule::{
    InterestWaiverPeriod, LoanSchedulePeriodData, LoanScheduleAccrualData, RepaymentInstallment, WaiverTransaction,
};
use crate::types::{LoanId, LoanStatus, RunMode};

/// double-entry posting of accounting bridge payloads
pub trait JournalEntrySink {
    fn create_journal_entries(&mut self, payload: &AccountingBridgeData) -> Result<()>;
}

/// loan state read at the start of an accrual attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanAccrualSnapshot {
    pub loan_id: LoanId,
    pub version: u64,
    pub status: LoanStatus,
    pub charges: Vec<LoanChargeData>,
    pub waiver_periods: Vec<InterestWaiverPeriod>,
    pub waiver_transactions: Vec<WaiverTransaction>,
}

impl LoanAccrualSnapshot {
    pub fn into_input(self, candidates: Vec<LoanScheduleAccrualData>) -> LoanAccrualInput {
        LoanAccrualInput {
            loan_id: self.loan_id,
            candidates,
            charges: self.charges,
            waiver_periods: self.waiver_periods,
            waiver_transactions: self.waiver_transactions,
        }
    }
}

/// one loan's accrual results, to be written atomically
#[derive(Debug, Clone, PartialEq)]
pub struct LoanAccrualCommit {
    pub loan_id: LoanId,
    /// version the results were computed from
    pub expected_version: u64,
    pub result: LoanAccrualResult,
}

pub trait AccrualStore {
    /// Candidate rows of active loans, grouped by loan and in installment
    /// order within a loan. `loan_id` restricts the read to one loan.
    fn accrual_candidates(
        &self,
        loan_id: Option<LoanId>,
        mode: RunMode,
        business_date: NaiveDate,
    ) -> Result<Vec<LoanScheduleAccrualData>>;

    fn load_loan(&self, loan_id: LoanId) -> Result<LoanAccrualSnapshot>;

    /// Write transactions, charge allocations, schedule totals, charges and
    /// the loan watermark, and post the journal entries. Nothing is written
    /// unless everything succeeds. Returns the loan's new version.
    fn commit_accruals(&mut self, commit: &LoanAccrualCommit, journal: &mut dyn JournalEntrySink) -> Result<u64>;
}

pub trait ArrearsStore {
    fn arrears_profile(&self, loan_id: LoanId) -> Result<LoanArrearsProfile>;

    fn repayment_schedule(&self, loan_id: LoanId) -> Result<Vec<RepaymentInstallment>>;

    /// latest original schedule versions of `loan_ids`, ordered by loan then due date
    fn original_schedule(&self, loan_ids: &[LoanId]) -> Result<Vec<LoanSchedulePeriodData>>;

    fn repayment_totals(&self, loan_id: LoanId) -> Result<LoanRepaymentTotals>;

    fn arrears(&self, loan_id: LoanId) -> Result<Option<ArrearsRow>>;

    fn apply_arrears(&mut self, change: &ArrearsChange) -> Result<()>;
}

/// loan held by the in-memory store
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLoan {
    // identification
    pub loan_id: LoanId,
    pub status: LoanStatus,
    pub version: u64,

    // accrual
    pub accrued_till: Option<NaiveDate>,
    pub schedule: Vec<LoanScheduleAccrualData>,
    pub charges: Vec<LoanChargeData>,
    pub waiver_periods: Vec<InterestWaiverPeriod>,
    pub waiver_transactions: Vec<WaiverTransaction>,

    // arrears
    pub arrears_profile: LoanArrearsProfile,
    pub installments: Vec<RepaymentInstallment>,
    pub original_schedule: Vec<LoanSchedulePeriodData>,
    pub repayment_totals: LoanRepaymentTotals,
}

impl MemoryLoan {
    pub fn new(loan_id: LoanId, status: LoanStatus) -> Self {
        Self {
            loan_id,
            status,
            version: 1,
            accrued_till: None,
            schedule: Vec::new(),
            charges: Vec::new(),
            waiver_periods: Vec::new(),
            waiver_transactions: Vec::new(),
            arrears_profile: LoanArrearsProfile::new(loan_id, status),
            installments: Vec::new(),
            original_schedule: Vec::new(),
            repayment_totals: LoanRepaymentTotals {
                loan_id,
                ..LoanRepaymentTotals::default()
            },
        }
    }

    pub fn schedule_row(&self, installment_number: u32) -> Option<&LoanScheduleAccrualData> {
        self.schedule
            .iter()
            .find(|r| r.installment_number == installment_number)
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    loans: BTreeMap<LoanId, MemoryLoan>,
    transactions: Vec<AccrualTransaction>,
    charges_paid: Vec<ChargePaidBy>,
    arrears: BTreeMap<LoanId, ArrearsRow>,
}

/// in-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: LedgerState,
    pending_conflicts: HashMap<LoanId, u32>,
    original_schedule_reads: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_loan(&mut self, loan: MemoryLoan) {
        self.state.loans.insert(loan.loan_id, loan);
    }

    pub fn loan(&self, loan_id: LoanId) -> Option<&MemoryLoan> {
        self.state.loans.get(&loan_id)
    }

    /// direct access for changes made outside the engine (repayments etc.)
    pub fn loan_mut(&mut self, loan_id: LoanId) -> Option<&mut MemoryLoan> {
        self.state.loans.get_mut(&loan_id)
    }

    pub fn transactions(&self) -> &[AccrualTransaction] {
        &self.state.transactions
    }

    pub fn transactions_for(&self, loan_id: LoanId) -> Vec<&AccrualTransaction> {
        self.state
            .transactions
            .iter()
            .filter(|t| t.loan_id == loan_id)
            .collect()
    }

    pub fn charges_paid(&self) -> &[ChargePaidBy] {
        &self.state.charges_paid
    }

    pub fn arrears_row(&self, loan_id: LoanId) -> Option<&ArrearsRow> {
        self.state.arrears.get(&loan_id)
    }

    pub fn arrears_rows(&self) -> impl Iterator<Item = &ArrearsRow> {
        self.state.arrears.values()
    }

    /// simulate `count` concurrent writers racing the next commits of a loan
    pub fn inject_conflicts(&mut self, loan_id: LoanId, count: u32) {
        self.pending_conflicts.insert(loan_id, count);
    }

    pub fn original_schedule_reads(&self) -> usize {
        self.original_schedule_reads.get()
    }

    fn require_loan(&self, loan_id: LoanId) -> Result<&MemoryLoan> {
        self.state
            .loans
            .get(&loan_id)
            .ok_or(AccrualError::LoanNotFound { loan_id })
    }

    /// another writer got there first: its version wins
    fn take_injected_conflict(&mut self, loan_id: LoanId) -> Option<AccrualError> {
        let remaining = self.pending_conflicts.get_mut(&loan_id)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        let loan = self.state.loans.get_mut(&loan_id)?;
        let expected = loan.version;
        loan.version += 1;
        Some(AccrualError::ConcurrencyConflict {
            loan_id,
            expected,
            found: loan.version,
        })
    }
}

fn is_candidate(row: &LoanScheduleAccrualData, mode: RunMode, business_date: NaiveDate) -> bool {
    match mode {
        RunMode::AsOfToday => row.due_date <= business_date,
        RunMode::TillDate(till_date) => row.from_date < till_date || row.due_date <= till_date,
    }
}

impl AccrualStore for MemoryStore {
    fn accrual_candidates(
        &self,
        loan_id: Option<LoanId>,
        mode: RunMode,
        business_date: NaiveDate,
    ) -> Result<Vec<LoanScheduleAccrualData>> {
        let rows = self
            .state
            .loans
            .values()
            .filter(|loan| loan_id.map_or(true, |id| id == loan.loan_id))
            .filter(|loan| loan.status.is_active())
            .flat_map(|loan| {
                loan.schedule
                    .iter()
                    .filter(move |row| is_candidate(row, mode, business_date))
                    .map(move |row| LoanScheduleAccrualData {
                        accrued_till: loan.accrued_till,
                        ..row.clone()
                    })
            })
            .collect();
        Ok(rows)
    }

    fn load_loan(&self, loan_id: LoanId) -> Result<LoanAccrualSnapshot> {
        let loan = self.require_loan(loan_id)?;
        Ok(LoanAccrualSnapshot {
            loan_id,
            version: loan.version,
            status: loan.status,
            charges: loan.charges.clone(),
            waiver_periods: loan.waiver_periods.clone(),
            waiver_transactions: loan.waiver_transactions.clone(),
        })
    }

    fn commit_accruals(&mut self, commit: &LoanAccrualCommit, journal: &mut dyn JournalEntrySink) -> Result<u64> {
        let loan_id = commit.loan_id;
        if let Some(conflict) = self.take_injected_conflict(loan_id) {
            return Err(conflict);
        }

        let mut staged = self.state.clone();
        let loan = staged
            .loans
            .get_mut(&loan_id)
            .ok_or(AccrualError::LoanNotFound { loan_id })?;
        if loan.version != commit.expected_version {
            return Err(AccrualError::ConcurrencyConflict {
                loan_id,
                expected: commit.expected_version,
                found: loan.version,
            });
        }

        for posting in &commit.result.postings {
            let update = &posting.schedule_update;
            let row = loan
                .schedule
                .iter_mut()
                .find(|r| r.repayment_schedule_id == update.repayment_schedule_id)
                .ok_or_else(|| AccrualError::InvalidSchedule {
                    loan_id,
                    message: format!("no schedule row {}", update.repayment_schedule_id),
                })?;
            row.accrued_interest_income = update.accrued_interest;
            row.accrued_fee_income = update.accrued_fee;
            row.accrued_penalty_income = update.accrued_penalty;

            staged.transactions.push(posting.transaction.clone());
            staged.charges_paid.extend(posting.charges_paid.iter().cloned());
        }
        loan.charges = commit.result.charges.clone();
        if let Some(accrued_till) = commit.result.accrued_till {
            loan.accrued_till = Some(accrued_till);
        }
        loan.version += 1;
        let version = loan.version;

        for payload in &commit.result.bridges {
            if let Err(err) = journal.create_journal_entries(payload) {
                warn!(loan_id, error = %err, "journal posting failed, discarding staged accruals");
                return Err(AccrualError::JournalPosting {
                    loan_id,
                    message: err.to_string(),
                });
            }
        }

        self.state = staged;
        debug!(loan_id, version, "accruals committed");
        Ok(version)
    }
}

impl ArrearsStore for MemoryStore {
    fn arrears_profile(&self, loan_id: LoanId) -> Result<LoanArrearsProfile> {
        let loan = self.require_loan(loan_id)?;
        Ok(LoanArrearsProfile {
            status: loan.status,
            ..loan.arrears_profile.clone()
        })
    }

    fn repayment_schedule(&self, loan_id: LoanId) -> Result<Vec<RepaymentInstallment>> {
        Ok(self.require_loan(loan_id)?.installments.clone())
    }

    fn original_schedule(&self, loan_ids: &[LoanId]) -> Result<Vec<LoanSchedulePeriodData>> {
        self.original_schedule_reads
            .set(self.original_schedule_reads.get() + 1);
        let mut rows: Vec<LoanSchedulePeriodData> = self
            .state
            .loans
            .values()
            .filter(|loan| loan_ids.contains(&loan.loan_id))
            .flat_map(|loan| loan.original_schedule.iter().cloned())
            .collect();
        rows.sort_by_key(|r| (r.loan_id, r.due_date));
        Ok(rows)
    }

    fn repayment_totals(&self, loan_id: LoanId) -> Result<LoanRepaymentTotals> {
        Ok(self.require_loan(loan_id)?.repayment_totals.clone())
    }

    fn arrears(&self, loan_id: LoanId) -> Result<Option<ArrearsRow>> {
        Ok(self.state.arrears.get(&loan_id).cloned())
    }

    fn apply_arrears(&mut self, change: &ArrearsChange) -> Result<()> {
        match change {
            ArrearsChange::Insert(row) => {
                if self.state.arrears.contains_key(&row.loan_id) {
                    return Err(AccrualError::Storage {
                        message: format!("arrears row for loan {} already exists", row.loan_id),
                    });
                }
                self.state.arrears.insert(row.loan_id, row.clone());
            }
            ArrearsChange::Update(row) => match self.state.arrears.get_mut(&row.loan_id) {
                Some(existing) => *existing = row.clone(),
                None => {
                    return Err(AccrualError::Storage {
                        message: format!("no arrears row to update for loan {}", row.loan_id),
                    })
                }
            },
            ArrearsChange::Delete(loan_id) => {
                self.state.arrears.remove(loan_id);
            }
        }
        Ok(())
    }
}

/// journal sink that keeps every payload, optionally refusing some loans
#[derive(Debug, Default)]
pub struct RecordingJournal {
    entries: Vec<AccountingBridgeData>,
    failing_loans: Vec<LoanId>,
}

impl RecordingJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// refuse every payload for `loan_id`
    pub fn failing_for(mut self, loan_id: LoanId) -> Self {
        self.failing_loans.push(loan_id);
        self
    }

    pub fn entries(&self) -> &[AccountingBridgeData] {
        &self.entries
    }
}

impl JournalEntrySink for RecordingJournal {
    fn create_journal_entries(&mut self, payload: &AccountingBridgeData) -> Result<()> {
        if self.failing_loans.contains(&payload.loan_id) {
            return Err(AccrualError::Storage {
                message: "journal unavailable".to_string(),
            });
        }
        self.entries.push(payload.clone());
        Ok(())
    }
}
