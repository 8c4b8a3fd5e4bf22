//! Past-due / arrears ageing.
//!
//! One row per loan in arrears. A row is always recomputed from scratch and
//! replaced; a loan with no principal overdue has no row at all.

pub mod live;
pub mod original;
pub mod triggers;

use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::AccrualSettings;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::{BusinessEventSink, LoanEvent};
use crate::store::ArrearsStore;
use crate::types::{LoanId, LoanStatus};

pub use live::{compute_live_arrears, update_live_arrears};
pub use original::{
    compute_original_arrears, group_by_loan, overlay_repayments, update_original_arrears, LoanRepaymentTotals,
    OverlaidPeriod,
};
pub use triggers::{ArrearsTrigger, LoanBusinessEvent};

/// arrears ageing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrearsRow {
    pub loan_id: LoanId,
    pub principal_overdue: Money,
    pub interest_overdue: Money,
    pub fee_charges_overdue: Money,
    pub penalty_charges_overdue: Money,
    pub total_overdue: Money,
    pub overdue_since_date: NaiveDate,
}

/// overdue components summed over a loan's periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverdueTotals {
    pub principal: Money,
    pub interest: Money,
    pub fee: Money,
    pub penalty: Money,
}

impl OverdueTotals {
    pub fn total(&self) -> Money {
        self.principal + self.interest + self.fee + self.penalty
    }

    /// the row for these totals, or `None` when no principal is overdue
    pub fn into_row(self, loan_id: LoanId, overdue_since_date: NaiveDate) -> Option<ArrearsRow> {
        if !self.principal.is_positive() {
            return None;
        }
        Some(ArrearsRow {
            loan_id,
            principal_overdue: self.principal,
            interest_overdue: self.interest,
            fee_charges_overdue: self.fee,
            penalty_charges_overdue: self.penalty,
            total_overdue: self.total(),
            overdue_since_date,
        })
    }
}

/// write needed to bring a loan's arrears row up to date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrearsChange {
    Insert(ArrearsRow),
    Update(ArrearsRow),
    Delete(LoanId),
}

impl ArrearsChange {
    /// replace semantics: insert or update when overdue, delete otherwise
    pub fn plan(loan_id: LoanId, existing: Option<&ArrearsRow>, computed: Option<ArrearsRow>) -> Self {
        match (existing, computed) {
            (None, Some(row)) => ArrearsChange::Insert(row),
            (Some(_), Some(row)) => ArrearsChange::Update(row),
            (_, None) => ArrearsChange::Delete(loan_id),
        }
    }

    pub fn loan_id(&self) -> LoanId {
        match self {
            ArrearsChange::Insert(row) | ArrearsChange::Update(row) => row.loan_id,
            ArrearsChange::Delete(loan_id) => *loan_id,
        }
    }

    pub fn row(&self) -> Option<&ArrearsRow> {
        match self {
            ArrearsChange::Insert(row) | ArrearsChange::Update(row) => Some(row),
            ArrearsChange::Delete(_) => None,
        }
    }

    /// notification for downstream listeners
    pub fn to_event(&self) -> LoanEvent {
        match self {
            ArrearsChange::Insert(row) | ArrearsChange::Update(row) => LoanEvent::ArrearsUpdated {
                loan_id: row.loan_id,
                total_overdue: row.total_overdue,
                overdue_since_date: row.overdue_since_date,
            },
            ArrearsChange::Delete(loan_id) => LoanEvent::ArrearsCleared { loan_id: *loan_id },
        }
    }
}

/// per-loan facts deciding how its arrears are computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanArrearsProfile {
    pub loan_id: LoanId,
    pub status: LoanStatus,
    pub interest_recalculation_enabled: bool,
    pub arrears_based_on_original_schedule: bool,
    /// overrides the configured grace when set
    pub grace_on_arrears_ageing: Option<u32>,
}

impl LoanArrearsProfile {
    pub fn new(loan_id: LoanId, status: LoanStatus) -> Self {
        Self {
            loan_id,
            status,
            interest_recalculation_enabled: false,
            arrears_based_on_original_schedule: false,
            grace_on_arrears_ageing: None,
        }
    }

    /// whether arrears follow the frozen original schedule
    pub fn uses_original_schedule(&self, settings: &AccrualSettings) -> bool {
        self.status.is_active()
            && self.interest_recalculation_enabled
            && (self.arrears_based_on_original_schedule || settings.arrears.on_original_schedule)
    }

    pub fn grace_days(&self, settings: &AccrualSettings) -> u32 {
        self.grace_on_arrears_ageing
            .unwrap_or(settings.arrears.grace_on_arrears_ageing)
    }
}

/// Recompute arrears for `loan_ids`, each in the mode its profile asks for.
///
/// Original-schedule loans are recomputed together in one read.
#[instrument(name = "arrears.update", skip_all, fields(loans = loan_ids.len()))]
pub fn update_arrears(
    store: &mut dyn ArrearsStore,
    events: &mut dyn BusinessEventSink,
    loan_ids: &[LoanId],
    settings: &AccrualSettings,
    time: &SafeTimeProvider,
) -> Result<Vec<ArrearsChange>> {
    let business_date = time.now().date_naive();

    let mut live_loans = Vec::new();
    let mut original_loans = Vec::new();
    for &loan_id in loan_ids {
        if store.arrears_profile(loan_id)?.uses_original_schedule(settings) {
            original_loans.push(loan_id);
        } else {
            live_loans.push(loan_id);
        }
    }

    let mut changes = Vec::with_capacity(loan_ids.len());
    for loan_id in live_loans {
        changes.push(update_live_arrears(store, loan_id, business_date)?);
    }
    if !original_loans.is_empty() {
        changes.extend(update_original_arrears(store, &original_loans, settings, business_date)?);
    }

    for change in &changes {
        events.publish(change.to_event());
    }

    info!(
        updated = changes.iter().filter(|c| c.row().is_some()).count(),
        cleared = changes.iter().filter(|c| c.row().is_none()).count(),
        "arrears recomputed"
    );
    Ok(changes)
}
