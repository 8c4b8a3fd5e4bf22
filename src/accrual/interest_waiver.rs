//! Interest waiver reconciliation.
//!
//! Waive-interest transactions are recorded against the loan, not against a
//! period. To know how much of a period's nominal interest is still
//! accruable, the waivers are replayed first-in-first-out over the periods
//! due before it: each prior period's waived interest is consumed from the
//! recognized pool first, then from the unrecognized pool.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::decimal::Money;
use crate::schedule::{InterestWaiverPeriod, LoanScheduleAccrualData, WaiverTransaction};

/// accruable interest after waivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestReconciliation {
    pub nominal_income: Option<Money>,
    pub accruable_income: Option<Money>,
    /// subtracted from the nominal income; `accruable + reduction == nominal`
    pub reduction: Money,
    /// prior-period waiver that no transaction could absorb
    pub unresolved_shortfall: Money,
}

impl InterestReconciliation {
    /// no waiver on the period
    pub fn unchanged(nominal_income: Option<Money>) -> Self {
        Self {
            nominal_income,
            accruable_income: nominal_income,
            reduction: Money::ZERO,
            unresolved_shortfall: Money::ZERO,
        }
    }
}

/// Accruable interest of `candidate` for a window ending at `till_date`.
///
/// `periods` are the loan's periods with waived interest in due-date order;
/// `transactions` the loan's waive-interest transactions.
pub fn reconcile_interest(
    candidate: &LoanScheduleAccrualData,
    periods: &[InterestWaiverPeriod],
    transactions: &[WaiverTransaction],
    till_date: NaiveDate,
) -> InterestReconciliation {
    let nominal = candidate.interest_income;
    let Some(waived) = candidate.waived_interest_income else {
        return InterestReconciliation::unchanged(nominal);
    };

    let mut applicable: Vec<&WaiverTransaction> = transactions
        .iter()
        .filter(|t| {
            t.date <= candidate.from_date
                || (t.date > candidate.from_date && t.date <= candidate.due_date && t.date <= till_date)
        })
        .collect();
    applicable.sort_by_key(|t| t.date);
    let mut pending = applicable.into_iter().peekable();

    let mut recognized = Money::ZERO;
    let mut unrecognized = Money::ZERO;
    let mut remaining = Money::ZERO;

    for period in periods {
        if recognized.is_less_than_or_equal_zero() && unrecognized.is_less_than_or_equal_zero() {
            if let Some(txn) = pending.next() {
                recognized += txn.interest_portion;
                unrecognized += txn.unrecognized_income_portion;
            }
        }

        if period.due_date >= candidate.due_date {
            continue;
        }

        remaining += period.interest_waived;
        if recognized > remaining {
            recognized -= remaining;
            remaining = Money::ZERO;
            continue;
        }

        remaining -= recognized;
        recognized = Money::ZERO;
        if unrecognized >= remaining {
            unrecognized -= remaining;
            remaining = Money::ZERO;
        } else {
            // when no transaction is left the shortfall stays unresolved
            remaining -= unrecognized;
            unrecognized = Money::ZERO;
            if pending.peek().is_none() {
                warn!(
                    loan_id = candidate.loan_id,
                    installment = candidate.installment_number,
                    shortfall = %remaining,
                    "waived interest exceeds recorded waiver transactions"
                );
            }
        }
    }

    let nominal_amount = nominal.unwrap_or(Money::ZERO);
    let excess = if waived > recognized {
        waived - recognized
    } else {
        Money::ZERO
    };
    let accruable = nominal_amount.saturating_sub(excess);

    InterestReconciliation {
        nominal_income: nominal,
        accruable_income: nominal.map(|_| accruable),
        reduction: nominal_amount - accruable,
        unresolved_shortfall: remaining,
    }
}
