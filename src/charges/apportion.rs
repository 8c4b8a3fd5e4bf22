//! Charge apportionment: which charges fall into an accrual window and how
//! much of each is newly accruable.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decimal::Money;
use crate::schedule::LoanScheduleAccrualData;
use crate::types::{AccrualPolicy, ChargeDefinitionId, LoanChargeId};

use super::LoanChargeData;

/// closed date window `[start, end]` an accrual covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AccrualWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// the candidate's own period `[from_date, due_date]`
    pub fn full_period(candidate: &LoanScheduleAccrualData) -> Self {
        Self::new(candidate.from_date, candidate.due_date)
    }
}

/// newly accruable amount of one charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeAllocation {
    pub loan_charge_id: LoanChargeId,
    pub charge_id: ChargeDefinitionId,
    pub is_penalty: bool,
    pub amount: Money,
    /// set when the allocation came from an installment fee breakdown row
    pub installment_number: Option<u32>,
}

/// result of apportioning a loan's charges over one window
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeApportionment {
    /// charges with a non-zero new delta, in charge order
    pub allocations: Vec<ChargeAllocation>,
    /// fee total for the window; `None` when zero
    pub fee_income: Option<Money>,
    /// penalty total for the window; `None` when zero
    pub penalty_income: Option<Money>,
}

impl ChargeApportionment {
    pub fn allocated_total(&self) -> Money {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    pub fn allocation_for(&self, loan_charge_id: LoanChargeId) -> Option<&ChargeAllocation> {
        self.allocations
            .iter()
            .find(|a| a.loan_charge_id == loan_charge_id)
    }

    /// charges as they stand once the allocations are accrued
    pub fn apply_to(&self, charges: &[LoanChargeData]) -> Vec<LoanChargeData> {
        charges
            .iter()
            .map(|charge| {
                let mut updated = charge.clone();
                if let Some(allocation) = self.allocation_for(charge.id) {
                    updated.amount_accrued = Some(charge.accrued() + allocation.amount);
                    if let Some(number) = allocation.installment_number {
                        for row in updated.installment_charges.iter_mut() {
                            if row.installment_number == number {
                                row.amount_accrued = Some(row.accrued() + allocation.amount);
                            }
                        }
                    }
                }
                updated
            })
            .collect()
    }
}

/// Apportion `charges` over `window` for `candidate` under `policy`.
///
/// Never fails: a charge with nothing new to accrue simply produces no
/// allocation.
pub fn apportion_charges(
    policy: AccrualPolicy,
    charges: &[LoanChargeData],
    candidate: &LoanScheduleAccrualData,
    window: AccrualWindow,
) -> ChargeApportionment {
    let select = match policy {
        AccrualPolicy::DueDate => is_due_in_window,
        AccrualPolicy::SubmittedDate => is_submitted_and_due_in_window,
    };

    let mut allocations = Vec::new();
    let mut fee_income = Money::ZERO;
    let mut penalty_income = Money::ZERO;

    for charge in charges {
        let contribution = match charge.due_date {
            None => installment_fee_contribution(charge, candidate, window, &mut allocations),
            Some(due_date) if select(charge, due_date, candidate, window) => {
                due_date_contribution(charge, &mut allocations)
            }
            Some(_) => Money::ZERO,
        };

        if charge.is_penalty {
            penalty_income += contribution;
        } else {
            fee_income += contribution;
        }
    }

    debug!(
        loan_id = candidate.loan_id,
        installment = candidate.installment_number,
        policy = %policy,
        allocations = allocations.len(),
        "apportioned charges"
    );

    ChargeApportionment {
        allocations,
        fee_income: fee_income.non_zero(),
        penalty_income: penalty_income.non_zero(),
    }
}

/// `(first installment AND due == start) OR due > start`, and `due <= end`
fn is_due_in_window(
    _charge: &LoanChargeData,
    due_date: NaiveDate,
    candidate: &LoanScheduleAccrualData,
    window: AccrualWindow,
) -> bool {
    ((candidate.installment_number == 1 && due_date == window.start) || due_date > window.start)
        && due_date <= window.end
}

/// `(first installment AND submitted == start == due) OR start < due`,
/// `end >= submitted`, and the schedule's due date has reached the charge's
fn is_submitted_and_due_in_window(
    charge: &LoanChargeData,
    due_date: NaiveDate,
    candidate: &LoanScheduleAccrualData,
    window: AccrualWindow,
) -> bool {
    let starts_on_first = candidate.installment_number == 1
        && window.start == charge.submitted_on_date
        && window.start == due_date;
    (starts_on_first || window.start < due_date)
        && window.end >= charge.submitted_on_date
        && candidate.due_date >= due_date
}

fn due_date_contribution(charge: &LoanChargeData, allocations: &mut Vec<ChargeAllocation>) -> Money {
    let accruable = charge.accruable_amount();
    if let Some(delta) = new_delta(charge.id, accruable, charge.accrued()) {
        allocations.push(ChargeAllocation {
            loan_charge_id: charge.id,
            charge_id: charge.charge_id,
            is_penalty: charge.is_penalty,
            amount: delta,
            installment_number: None,
        });
    }
    accruable
}

fn installment_fee_contribution(
    charge: &LoanChargeData,
    candidate: &LoanScheduleAccrualData,
    window: AccrualWindow,
    allocations: &mut Vec<ChargeAllocation>,
) -> Money {
    // installment fees are only recognized on the installment's own due date
    if !charge.is_installment_fee || window.end != candidate.due_date {
        return Money::ZERO;
    }
    let Some(row) = charge.installment(candidate.installment_number) else {
        return Money::ZERO;
    };

    let accruable = row.accruable_amount();
    if let Some(delta) = new_delta(charge.id, accruable, row.accrued()) {
        allocations.push(ChargeAllocation {
            loan_charge_id: charge.id,
            charge_id: charge.charge_id,
            is_penalty: charge.is_penalty,
            amount: delta,
            installment_number: Some(row.installment_number),
        });
    }
    accruable
}

/// delta to accrue, if any
fn new_delta(loan_charge_id: LoanChargeId, accruable: Money, accrued: Money) -> Option<Money> {
    if !accruable.is_positive() || accruable == accrued {
        return None;
    }
    let delta = accruable - accrued;
    if delta.is_negative() {
        warn!(
            loan_charge_id,
            accruable = %accruable,
            accrued = %accrued,
            "charge accrued beyond its accruable amount"
        );
        return None;
    }
    Some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charges::LoanInstallmentChargeData;
    use crate::decimal::CurrencyData;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(d: rust_decimal::Decimal) -> Money {
        Money::from_decimal(d)
    }

    fn candidate(installment_number: u32, from: NaiveDate, due: NaiveDate) -> LoanScheduleAccrualData {
        LoanScheduleAccrualData {
            loan_id: 1,
            office_id: 1,
            loan_product_id: 1,
            repayment_schedule_id: installment_number as i64,
            installment_number,
            from_date: from,
            due_date: due,
            accrued_till: None,
            interest_calculated_from: None,
            interest_income: Some(money(dec!(100))),
            accrued_interest_income: None,
            accrued_fee_income: None,
            accrued_penalty_income: None,
            waived_interest_income: None,
            credited_fee: None,
            credited_penalty: None,
            currency: CurrencyData::new("USD", 2),
        }
    }

    fn fee(id: i64, due: NaiveDate, submitted: NaiveDate, amount: rust_decimal::Decimal) -> LoanChargeData {
        LoanChargeData::due_on(id, 900 + id, due, submitted, money(amount), false)
    }

    #[test]
    fn test_due_date_policy_includes_charge_inside_window() {
        let c = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let charges = vec![fee(1, date(2024, 1, 31), date(2024, 1, 1), dec!(10))];

        let result = apportion_charges(AccrualPolicy::DueDate, &charges, &c, AccrualWindow::full_period(&c));

        assert_eq!(result.fee_income, Some(money(dec!(10))));
        assert_eq!(result.penalty_income, None);
        assert_eq!(result.allocations.len(), 1);
        assert_eq!(result.allocations[0].amount, money(dec!(10)));
    }

    #[test]
    fn test_due_date_policy_window_start_is_exclusive_after_first_installment() {
        let charges = vec![fee(1, date(2024, 2, 1), date(2024, 1, 1), dec!(10))];

        let second = candidate(2, date(2024, 2, 1), date(2024, 3, 1));
        let result = apportion_charges(AccrualPolicy::DueDate, &charges, &second, AccrualWindow::full_period(&second));
        assert!(result.allocations.is_empty());
        assert_eq!(result.fee_income, None);

        // the previous installment ends on the charge date and picks it up
        let first = candidate(1, date(2024, 1, 1), date(2024, 2, 1));
        let result = apportion_charges(AccrualPolicy::DueDate, &charges, &first, AccrualWindow::full_period(&first));
        assert_eq!(result.allocated_total(), money(dec!(10)));
    }

    #[test]
    fn test_due_date_policy_first_installment_includes_start_date() {
        let c = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let charges = vec![fee(1, date(2024, 1, 1), date(2024, 1, 1), dec!(15))];
        let result = apportion_charges(AccrualPolicy::DueDate, &charges, &c, AccrualWindow::full_period(&c));
        assert_eq!(result.allocated_total(), money(dec!(15)));
    }

    #[test]
    fn test_unrecognized_amount_is_excluded() {
        let c = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let mut charge = fee(1, date(2024, 1, 20), date(2024, 1, 1), dec!(10));
        charge.amount_unrecognized = Some(money(dec!(4)));

        let result = apportion_charges(AccrualPolicy::DueDate, &[charge], &c, AccrualWindow::full_period(&c));
        assert_eq!(result.allocated_total(), money(dec!(6)));
        assert_eq!(result.fee_income, Some(money(dec!(6))));
    }

    #[test]
    fn test_fully_accrued_charge_has_no_allocation_but_counts_in_total() {
        let c = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let mut charge = fee(1, date(2024, 1, 20), date(2024, 1, 1), dec!(10));
        charge.amount_accrued = Some(money(dec!(10)));

        let result = apportion_charges(AccrualPolicy::DueDate, &[charge], &c, AccrualWindow::full_period(&c));
        assert!(result.allocations.is_empty());
        assert_eq!(result.fee_income, Some(money(dec!(10))));
    }

    #[test]
    fn test_partially_accrued_charge_allocates_remainder() {
        let c = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let mut charge = fee(1, date(2024, 1, 20), date(2024, 1, 1), dec!(10));
        charge.amount_accrued = Some(money(dec!(3)));

        let result = apportion_charges(AccrualPolicy::DueDate, &[charge], &c, AccrualWindow::full_period(&c));
        assert_eq!(result.allocated_total(), money(dec!(7)));
    }

    #[test]
    fn test_penalties_are_totalled_separately() {
        let c = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let charges = vec![
            fee(1, date(2024, 1, 20), date(2024, 1, 1), dec!(10)),
            LoanChargeData::due_on(2, 50, date(2024, 1, 25), date(2024, 1, 1), money(dec!(3.5)), true),
        ];
        let result = apportion_charges(AccrualPolicy::DueDate, &charges, &c, AccrualWindow::full_period(&c));
        assert_eq!(result.fee_income, Some(money(dec!(10))));
        assert_eq!(result.penalty_income, Some(money(dec!(3.5))));
        assert!(result.allocation_for(2).unwrap().is_penalty);
    }

    #[test]
    fn test_installment_fee_only_on_installment_due_date() {
        let c = candidate(2, date(2024, 1, 31), date(2024, 2, 29));
        let charge = LoanChargeData::installment_fee(
            7,
            77,
            date(2024, 1, 1),
            vec![
                LoanInstallmentChargeData::new(1, date(2024, 1, 31), money(dec!(5))),
                LoanInstallmentChargeData::new(2, date(2024, 2, 29), money(dec!(6))),
            ],
        );

        let partial = AccrualWindow::new(c.from_date, date(2024, 2, 15));
        let result = apportion_charges(AccrualPolicy::DueDate, std::slice::from_ref(&charge), &c, partial);
        assert!(result.allocations.is_empty());
        assert_eq!(result.fee_income, None);

        let result = apportion_charges(AccrualPolicy::DueDate, std::slice::from_ref(&charge), &c, AccrualWindow::full_period(&c));
        let allocation = result.allocation_for(7).unwrap();
        assert_eq!(allocation.amount, money(dec!(6)));
        assert_eq!(allocation.installment_number, Some(2));
        assert_eq!(result.fee_income, Some(money(dec!(6))));
    }

    #[test]
    fn test_apply_to_advances_accrued_amounts() {
        let c = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let charges = vec![
            fee(1, date(2024, 1, 20), date(2024, 1, 1), dec!(10)),
            LoanChargeData::installment_fee(
                2,
                77,
                date(2024, 1, 1),
                vec![LoanInstallmentChargeData::new(1, date(2024, 1, 31), money(dec!(5)))],
            ),
        ];
        let result = apportion_charges(AccrualPolicy::DueDate, &charges, &c, AccrualWindow::full_period(&c));
        let updated = result.apply_to(&charges);

        assert_eq!(updated[0].amount_accrued, Some(money(dec!(10))));
        assert_eq!(updated[1].amount_accrued, Some(money(dec!(5))));
        assert_eq!(updated[1].installment_charges[0].amount_accrued, Some(money(dec!(5))));

        // a second pass over the same window finds nothing new
        let again = apportion_charges(AccrualPolicy::DueDate, &updated, &c, AccrualWindow::full_period(&c));
        assert!(again.allocations.is_empty());
        assert_eq!(again.fee_income, Some(money(dec!(15))));
    }

    #[test]
    fn test_submitted_date_policy_waits_for_schedule_due_date() {
        let charges = vec![fee(1, date(2024, 2, 10), date(2024, 1, 15), dec!(10))];

        // schedule due date before the charge due date: not yet
        let first = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let result = apportion_charges(AccrualPolicy::SubmittedDate, &charges, &first, AccrualWindow::full_period(&first));
        assert!(result.allocations.is_empty());

        let second = candidate(2, date(2024, 1, 31), date(2024, 2, 29));
        let result = apportion_charges(AccrualPolicy::SubmittedDate, &charges, &second, AccrualWindow::full_period(&second));
        assert_eq!(result.allocated_total(), money(dec!(10)));
    }

    #[test]
    fn test_submitted_date_policy_requires_submission_inside_window() {
        let c = candidate(2, date(2024, 1, 31), date(2024, 2, 29));
        let charges = vec![fee(1, date(2024, 2, 20), date(2024, 2, 25), dec!(10))];

        let early = AccrualWindow::new(c.from_date, date(2024, 2, 24));
        let result = apportion_charges(AccrualPolicy::SubmittedDate, &charges, &c, early);
        assert!(result.allocations.is_empty());

        let result = apportion_charges(AccrualPolicy::SubmittedDate, &charges, &c, AccrualWindow::full_period(&c));
        assert_eq!(result.allocated_total(), money(dec!(10)));
    }

    #[test]
    fn test_submitted_date_policy_first_installment_same_day_charge() {
        let c = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let same_day = vec![fee(1, date(2024, 1, 1), date(2024, 1, 1), dec!(25))];
        let result = apportion_charges(AccrualPolicy::SubmittedDate, &same_day, &c, AccrualWindow::full_period(&c));
        assert_eq!(result.allocated_total(), money(dec!(25)));

        let second = candidate(2, date(2024, 1, 1), date(2024, 1, 31));
        let result = apportion_charges(AccrualPolicy::SubmittedDate, &same_day, &second, AccrualWindow::full_period(&second));
        assert!(result.allocations.is_empty());
    }

    #[test]
    fn test_policies_attribute_charges_to_exact_installments() {
        let first = candidate(1, date(2024, 1, 1), date(2024, 1, 31));
        let second = candidate(2, date(2024, 1, 31), date(2024, 2, 29));

        let installments_charged = |policy, charges: &[LoanChargeData]| -> Vec<u32> {
            [&first, &second]
                .into_iter()
                .filter(|c| {
                    !apportion_charges(policy, charges, c, AccrualWindow::full_period(c))
                        .allocations
                        .is_empty()
                })
                .map(|c| c.installment_number)
                .collect()
        };

        // submitted in period 2 but due back in period 1
        let backdated = vec![fee(1, date(2024, 1, 20), date(2024, 2, 10), dec!(10))];
        assert_eq!(installments_charged(AccrualPolicy::DueDate, &backdated), vec![1]);
        assert_eq!(installments_charged(AccrualPolicy::SubmittedDate, &backdated), Vec::<u32>::new());

        // submitted in period 1, due in period 2
        let forward = vec![fee(2, date(2024, 2, 20), date(2024, 1, 15), dec!(10))];
        assert_eq!(installments_charged(AccrualPolicy::DueDate, &forward), vec![2]);
        assert_eq!(installments_charged(AccrualPolicy::SubmittedDate, &forward), vec![2]);

        // a till-date window short of the due date only picks it up by submission
        let till = AccrualWindow::new(date(2024, 1, 31), date(2024, 2, 10));
        let by_due = apportion_charges(AccrualPolicy::DueDate, &forward, &second, till);
        assert!(by_due.allocations.is_empty());
        assert_eq!(by_due.fee_income, None);

        let by_submission = apportion_charges(AccrualPolicy::SubmittedDate, &forward, &second, till);
        assert_eq!(by_submission.allocations.len(), 1);
        assert_eq!(by_submission.allocations[0].loan_charge_id, 2);
        assert_eq!(by_submission.fee_income, Some(money(dec!(10))));
    }
}
