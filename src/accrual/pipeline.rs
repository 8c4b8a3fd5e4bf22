use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::charges::{apportion_charges, AccrualWindow, LoanChargeData};
use crate::config::AccrualSettings;
use crate::errors::{AccrualError, Result};
use crate::schedule::{InterestWaiverPeriod, LoanScheduleAccrualData, WaiverTransaction};
use crate::types::{AccrualPolicy, LoanId, RunMode};

use super::bridge::AccountingBridgeData;
use super::builder::{build_full_period, build_till_date, AccrualPosting, PreparedAccrual};
use super::interest_waiver::reconcile_interest;

/// everything read for one loan before accruing it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanAccrualInput {
    pub loan_id: LoanId,
    /// candidate rows in installment order
    pub candidates: Vec<LoanScheduleAccrualData>,
    pub charges: Vec<LoanChargeData>,
    pub waiver_periods: Vec<InterestWaiverPeriod>,
    pub waiver_transactions: Vec<WaiverTransaction>,
}

/// what one loan's accrual produced
#[derive(Debug, Clone, PartialEq)]
pub struct LoanAccrualResult {
    pub loan_id: LoanId,
    pub postings: Vec<AccrualPosting>,
    pub bridges: Vec<AccountingBridgeData>,
    /// charges with accrued amounts advanced by the postings
    pub charges: Vec<LoanChargeData>,
    /// new loan watermark; `None` when nothing was posted
    pub accrued_till: Option<NaiveDate>,
}

impl LoanAccrualResult {
    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

/// Charge and interest figures for one window of a candidate.
pub fn prepare_accrual(
    candidate: &LoanScheduleAccrualData,
    charges: &[LoanChargeData],
    input: &LoanAccrualInput,
    policy: AccrualPolicy,
    window: AccrualWindow,
    waiver_till: NaiveDate,
) -> PreparedAccrual {
    PreparedAccrual {
        schedule: candidate.clone(),
        charges: apportion_charges(policy, charges, candidate, window),
        interest: reconcile_interest(
            candidate,
            &input.waiver_periods,
            &input.waiver_transactions,
            waiver_till,
        ),
    }
}

/// Accrue one loan.
///
/// `AsOfToday` accrues every candidate over its full period. `TillDate`
/// accrues candidates due by the till date in full and prorates the first
/// later one, unless the loan's watermark already reaches the till date.
pub fn accrue_loan(
    input: &LoanAccrualInput,
    mode: RunMode,
    settings: &AccrualSettings,
    processing_date: NaiveDate,
) -> Result<LoanAccrualResult> {
    validate(input)?;

    let policy = settings.policy;
    let mut charges = input.charges.clone();
    let mut postings = Vec::new();

    let mut post = |prepared: &PreparedAccrual, posting: Option<AccrualPosting>, charges: &mut Vec<LoanChargeData>| {
        if let Some(posting) = posting {
            *charges = prepared.charges.apply_to(charges);
            postings.push(posting);
        }
    };

    match mode {
        RunMode::AsOfToday => {
            for candidate in &input.candidates {
                let window = AccrualWindow::full_period(candidate);
                let prepared = prepare_accrual(candidate, &charges, input, policy, window, candidate.due_date);
                let posting = build_full_period(&prepared, settings, processing_date);
                post(&prepared, posting, &mut charges);
            }
        }
        RunMode::TillDate(till_date) => {
            let mut watermark: Option<NaiveDate> = None;
            let mut first_future = true;

            for candidate in &input.candidates {
                if candidate.due_date > till_date {
                    if first_future || watermark.is_none() {
                        watermark = candidate.accrued_till;
                        first_future = false;
                    }
                    if watermark.map_or(true, |accrued| accrued < till_date) {
                        let window = AccrualWindow::new(candidate.from_date, till_date);
                        let prepared = prepare_accrual(candidate, &charges, input, policy, window, till_date);
                        let posting = build_till_date(&prepared, settings, till_date, processing_date);
                        post(&prepared, posting, &mut charges);
                    } else {
                        debug!(
                            loan_id = input.loan_id,
                            installment = candidate.installment_number,
                            "already accrued through till date"
                        );
                    }
                } else {
                    let window = AccrualWindow::full_period(candidate);
                    let prepared = prepare_accrual(candidate, &charges, input, policy, window, till_date);
                    let posting = build_full_period(&prepared, settings, processing_date);
                    post(&prepared, posting, &mut charges);
                    watermark = Some(candidate.due_date);
                }
            }
        }
    }

    let bridges = postings
        .iter()
        .filter_map(|posting| {
            input
                .candidates
                .iter()
                .find(|c| c.repayment_schedule_id == posting.schedule_update.repayment_schedule_id)
                .map(|row| AccountingBridgeData::for_posting(row, posting, settings.accounting_method))
        })
        .collect();
    let accrued_till = postings.last().map(|p| p.accrued_till);

    Ok(LoanAccrualResult {
        loan_id: input.loan_id,
        postings,
        bridges,
        charges,
        accrued_till,
    })
}

fn validate(input: &LoanAccrualInput) -> Result<()> {
    for candidate in &input.candidates {
        if candidate.loan_id != input.loan_id {
            return Err(AccrualError::InvalidSchedule {
                loan_id: input.loan_id,
                message: format!(
                    "installment {} belongs to loan {}",
                    candidate.installment_number, candidate.loan_id
                ),
            });
        }
        if candidate.from_date > candidate.due_date {
            return Err(AccrualError::InvalidSchedule {
                loan_id: input.loan_id,
                message: format!(
                    "installment {} starts {} after its due date {}",
                    candidate.installment_number, candidate.from_date, candidate.due_date
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charges::LoanInstallmentChargeData;
    use crate::decimal::{CurrencyData, Money};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(d: rust_decimal::Decimal) -> Money {
        Money::from_decimal(d)
    }

    fn row(n: u32, from: NaiveDate, due: NaiveDate) -> LoanScheduleAccrualData {
        LoanScheduleAccrualData {
            loan_id: 1,
            office_id: 1,
            loan_product_id: 1,
            repayment_schedule_id: 100 + n as i64,
            installment_number: n,
            from_date: from,
            due_date: due,
            accrued_till: None,
            interest_calculated_from: None,
            interest_income: Some(money(dec!(100.00))),
            accrued_interest_income: None,
            accrued_fee_income: None,
            accrued_penalty_income: None,
            waived_interest_income: None,
            credited_fee: None,
            credited_penalty: None,
            currency: CurrencyData::new("USD", 2),
        }
    }

    fn two_installments() -> LoanAccrualInput {
        LoanAccrualInput {
            loan_id: 1,
            candidates: vec![
                row(1, date(2024, 1, 1), date(2024, 1, 31)),
                row(2, date(2024, 1, 31), date(2024, 3, 1)),
            ],
            charges: vec![LoanChargeData::due_on(
                9,
                90,
                date(2024, 1, 10),
                date(2024, 1, 1),
                money(dec!(10.00)),
                false,
            )],
            ..LoanAccrualInput::default()
        }
    }

    #[test]
    fn test_as_of_today_accrues_every_candidate() {
        let input = two_installments();
        let result = accrue_loan(&input, RunMode::AsOfToday, &AccrualSettings::default(), date(2024, 3, 2)).unwrap();

        assert_eq!(result.postings.len(), 2);
        assert_eq!(result.postings[0].transaction.amount, money(dec!(110.00)));
        assert_eq!(result.postings[1].transaction.amount, money(dec!(100.00)));
        assert_eq!(result.bridges.len(), 2);
        assert_eq!(result.accrued_till, Some(date(2024, 3, 1)));
        assert_eq!(result.charges[0].amount_accrued, Some(money(dec!(10.00))));
    }

    #[test]
    fn test_till_date_accrues_past_rows_and_prorates_current() {
        let input = two_installments();
        let result = accrue_loan(
            &input,
            RunMode::TillDate(date(2024, 2, 15)),
            &AccrualSettings::default(),
            date(2024, 2, 15),
        )
        .unwrap();

        assert_eq!(result.postings.len(), 2);
        assert_eq!(result.postings[0].accrued_till, date(2024, 1, 31));
        // 15 of 30 days of the second period
        let partial = &result.postings[1];
        assert_eq!(partial.transaction.interest_portion, Some(money(dec!(50.00))));
        assert_eq!(partial.transaction.transaction_date, date(2024, 2, 15));
        assert_eq!(result.accrued_till, Some(date(2024, 2, 15)));
    }

    #[test]
    fn test_till_date_skips_row_already_accrued_through_till() {
        let mut input = two_installments();
        input.candidates.remove(0);
        input.candidates[0].accrued_till = Some(date(2024, 2, 15));
        input.candidates[0].accrued_interest_income = Some(money(dec!(50.00)));

        let result = accrue_loan(
            &input,
            RunMode::TillDate(date(2024, 2, 15)),
            &AccrualSettings::default(),
            date(2024, 2, 15),
        )
        .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.accrued_till, None);
    }

    #[test]
    fn test_installment_fee_advances_within_run() {
        let mut input = two_installments();
        input.charges = vec![LoanChargeData::installment_fee(
            5,
            50,
            date(2024, 1, 1),
            vec![
                LoanInstallmentChargeData::new(1, date(2024, 1, 31), money(dec!(2.50))),
                LoanInstallmentChargeData::new(2, date(2024, 3, 1), money(dec!(2.50))),
            ],
        )];

        let result = accrue_loan(&input, RunMode::AsOfToday, &AccrualSettings::default(), date(2024, 3, 2)).unwrap();
        assert_eq!(result.postings[0].transaction.fee_charges_portion, Some(money(dec!(2.50))));
        assert_eq!(result.postings[1].transaction.fee_charges_portion, Some(money(dec!(2.50))));

        let charge = &result.charges[0];
        assert_eq!(charge.amount_accrued, Some(money(dec!(5.00))));
        assert_eq!(charge.installment(1).unwrap().amount_accrued, Some(money(dec!(2.50))));
        assert_eq!(charge.installment(2).unwrap().amount_accrued, Some(money(dec!(2.50))));
    }

    #[test]
    fn test_foreign_candidate_is_rejected() {
        let mut input = two_installments();
        input.candidates[1].loan_id = 2;
        let err = accrue_loan(&input, RunMode::AsOfToday, &AccrualSettings::default(), date(2024, 3, 2)).unwrap_err();
        assert!(matches!(err, AccrualError::InvalidSchedule { loan_id: 1, .. }));
    }
}
