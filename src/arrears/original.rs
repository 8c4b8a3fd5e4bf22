use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AccrualSettings;
use crate::decimal::Money;
use crate::errors::Result;
use crate::schedule::LoanSchedulePeriodData;
use crate::store::ArrearsStore;
use crate::types::LoanId;

use super::{ArrearsChange, ArrearsRow, OverdueTotals};

/// loan-wide repayment totals laid over the original schedule
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRepaymentTotals {
    pub loan_id: LoanId,
    pub principal_paid: Money,
    pub principal_written_off: Money,
    pub interest_paid: Money,
    pub interest_waived: Money,
    pub fee_paid: Money,
    pub fee_waived: Money,
    pub penalty_paid: Money,
    pub penalty_waived: Money,
}

/// original period with its share of the loan's repayments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaidPeriod {
    pub period: LoanSchedulePeriodData,
    pub principal_paid: Money,
    pub interest_paid: Money,
    pub fee_charges_paid: Money,
    pub penalty_charges_paid: Money,
    /// every component fully absorbed
    pub complete: bool,
}

/// Split rows ordered by loan into one group per loan, in a single pass.
pub fn group_by_loan(rows: Vec<LoanSchedulePeriodData>) -> Vec<(LoanId, Vec<LoanSchedulePeriodData>)> {
    let mut groups: Vec<(LoanId, Vec<LoanSchedulePeriodData>)> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some((loan_id, periods)) if *loan_id == row.loan_id => periods.push(row),
            _ => groups.push((row.loan_id, vec![row])),
        }
    }
    groups
}

/// Consume the loan totals period by period, oldest first.
pub fn overlay_repayments(periods: &[LoanSchedulePeriodData], totals: &LoanRepaymentTotals) -> Vec<OverlaidPeriod> {
    let mut principal = totals.principal_paid + totals.principal_written_off;
    let mut interest = totals.interest_paid + totals.interest_waived;
    let mut fee = totals.fee_paid + totals.fee_waived;
    let mut penalty = totals.penalty_paid + totals.penalty_waived;

    periods
        .iter()
        .map(|period| {
            let mut complete = true;
            let mut absorb = |due: Money, pool: &mut Money| {
                if due > *pool {
                    complete = false;
                    std::mem::replace(pool, Money::ZERO)
                } else {
                    *pool -= due;
                    due
                }
            };
            let principal_paid = absorb(period.principal_due, &mut principal);
            let interest_paid = absorb(period.interest_due, &mut interest);
            let fee_charges_paid = absorb(period.fee_charges_due, &mut fee);
            let penalty_charges_paid = absorb(period.penalty_charges_due, &mut penalty);

            OverlaidPeriod {
                period: period.clone(),
                principal_paid,
                interest_paid,
                fee_charges_paid,
                penalty_charges_paid,
                complete,
            }
        })
        .collect()
}

/// Arrears over overlaid original periods.
pub fn compute_original_arrears(
    loan_id: LoanId,
    periods: &[OverlaidPeriod],
    business_date: NaiveDate,
) -> Option<ArrearsRow> {
    let mut totals = OverdueTotals::default();
    let mut overdue_since = business_date;

    for p in periods.iter().filter(|p| !p.complete) {
        totals.principal += p.period.principal_due.saturating_sub(p.principal_paid);
        totals.interest += p.period.interest_due.saturating_sub(p.interest_paid);
        totals.fee += p.period.fee_charges_due.saturating_sub(p.fee_charges_paid);
        totals.penalty += p.period.penalty_charges_due.saturating_sub(p.penalty_charges_paid);
        if p.period.due_date < overdue_since && p.period.principal_due > p.principal_paid {
            overdue_since = p.period.due_date;
        }
    }

    totals.into_row(loan_id, overdue_since)
}

/// Recompute arrears of several loans against their original schedules.
///
/// The schedules of all loans are read at once; each loan only counts
/// periods due before its grace window.
pub fn update_original_arrears(
    store: &mut dyn ArrearsStore,
    loan_ids: &[LoanId],
    settings: &AccrualSettings,
    business_date: NaiveDate,
) -> Result<Vec<ArrearsChange>> {
    let mut groups = group_by_loan(store.original_schedule(loan_ids)?);

    let mut changes = Vec::with_capacity(loan_ids.len());
    for &loan_id in loan_ids {
        let periods = groups
            .iter_mut()
            .find(|(id, _)| *id == loan_id)
            .map(|(_, periods)| std::mem::take(periods))
            .unwrap_or_default();

        let grace = store.arrears_profile(loan_id)?.grace_days(settings);
        let cutoff = business_date - Duration::days(i64::from(grace));
        let past_due: Vec<LoanSchedulePeriodData> = periods.into_iter().filter(|p| p.due_date < cutoff).collect();

        let computed = if past_due.is_empty() {
            None
        } else {
            let totals = store.repayment_totals(loan_id)?;
            compute_original_arrears(loan_id, &overlay_repayments(&past_due, &totals), business_date)
        };

        let existing = store.arrears(loan_id)?;
        let change = ArrearsChange::plan(loan_id, existing.as_ref(), computed);
        store.apply_arrears(&change)?;
        debug!(loan_id, grace, overdue = change.row().is_some(), "original schedule arrears updated");
        changes.push(change);
    }
    Ok(changes)
}
