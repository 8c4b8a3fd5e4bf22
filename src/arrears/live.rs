use chrono::NaiveDate;
use tracing::debug;

use crate::errors::Result;
use crate::schedule::RepaymentInstallment;
use crate::store::ArrearsStore;
use crate::types::LoanId;

use super::{ArrearsChange, ArrearsRow, OverdueTotals};

/// Arrears from the live repayment schedule as of `business_date`.
pub fn compute_live_arrears(
    loan_id: LoanId,
    installments: &[RepaymentInstallment],
    business_date: NaiveDate,
) -> Option<ArrearsRow> {
    let mut totals = OverdueTotals::default();
    let mut overdue_since = business_date;

    for installment in installments.iter().filter(|i| i.due_date < business_date) {
        totals.principal += installment.principal.outstanding();
        totals.interest += installment.interest.outstanding();
        totals.fee += installment.fee.outstanding();
        totals.penalty += installment.penalty.outstanding();
        if !installment.is_fully_settled() && installment.due_date < overdue_since {
            overdue_since = installment.due_date;
        }
    }

    totals.into_row(loan_id, overdue_since)
}

/// Recompute and store one loan's arrears from its live schedule.
pub fn update_live_arrears(
    store: &mut dyn ArrearsStore,
    loan_id: LoanId,
    business_date: NaiveDate,
) -> Result<ArrearsChange> {
    let installments = store.repayment_schedule(loan_id)?;
    let computed = compute_live_arrears(loan_id, &installments, business_date);
    let existing = store.arrears(loan_id)?;
    let change = ArrearsChange::plan(loan_id, existing.as_ref(), computed);
    store.apply_arrears(&change)?;

    debug!(loan_id, overdue = change.row().is_some(), "live arrears updated");
    Ok(change)
}
