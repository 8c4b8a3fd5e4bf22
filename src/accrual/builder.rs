use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::charges::{ChargeAllocation, ChargeApportionment};
use crate::config::AccrualSettings;
use crate::decimal::{CurrencyData, Money};
use crate::schedule::LoanScheduleAccrualData;
use crate::types::{AccrualPolicy, LedgerTransactionType, LoanChargeId, LoanId, TransactionId};

use super::interest_waiver::InterestReconciliation;

/// Stage record handed to the builder: the schedule row together with the
/// charge and interest figures derived for the window.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAccrual {
    pub schedule: LoanScheduleAccrualData,
    pub charges: ChargeApportionment,
    pub interest: InterestReconciliation,
}

impl PreparedAccrual {
    pub fn accruable_interest(&self) -> Option<Money> {
        self.interest.accruable_income
    }

    pub fn fee_income(&self) -> Option<Money> {
        self.charges.fee_income
    }

    pub fn penalty_income(&self) -> Option<Money> {
        self.charges.penalty_income
    }
}

/// accrual ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualTransaction {
    pub id: TransactionId,
    pub loan_id: LoanId,
    pub office_id: i64,
    pub transaction_type: LedgerTransactionType,
    pub transaction_date: NaiveDate,
    pub submitted_on_date: NaiveDate,
    pub amount: Money,
    pub interest_portion: Option<Money>,
    pub fee_charges_portion: Option<Money>,
    pub penalty_charges_portion: Option<Money>,
    pub currency: CurrencyData,
}

/// charge consumed by an accrual transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePaidBy {
    pub loan_transaction_id: TransactionId,
    pub loan_charge_id: LoanChargeId,
    pub amount: Money,
    pub installment_number: u32,
}

/// new accrual totals for a schedule row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleAccrualUpdate {
    pub repayment_schedule_id: i64,
    pub installment_number: u32,
    pub accrued_interest: Option<Money>,
    pub accrued_fee: Option<Money>,
    pub accrued_penalty: Option<Money>,
}

/// everything one accrual writes for a schedule row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualPosting {
    pub transaction: AccrualTransaction,
    pub charges_paid: Vec<ChargePaidBy>,
    pub allocations: Vec<ChargeAllocation>,
    pub schedule_update: ScheduleAccrualUpdate,
    pub accrued_till: NaiveDate,
}

/// one component's delta and resulting total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Portion {
    delta: Option<Money>,
    total: Option<Money>,
}

impl Portion {
    /// `target - accrued - credited`, clamped at zero
    fn of(target: Option<Money>, accrued: Option<Money>, credited: Option<Money>) -> Self {
        let Some(target) = target else {
            return Portion {
                delta: None,
                total: accrued,
            };
        };
        let accrued = accrued.unwrap_or(Money::ZERO);
        let credited = credited.unwrap_or(Money::ZERO);
        let delta = target.saturating_sub(accrued + credited);
        Portion {
            delta: delta.non_zero(),
            total: Some(accrued + delta),
        }
    }

    fn amount(&self) -> Money {
        self.delta.unwrap_or(Money::ZERO)
    }
}

/// Accrue a whole installment period.
///
/// Returns `None` when there is nothing new to accrue.
pub fn build_full_period(
    prepared: &PreparedAccrual,
    settings: &AccrualSettings,
    processing_date: NaiveDate,
) -> Option<AccrualPosting> {
    let row = &prepared.schedule;
    let round = |m: Option<Money>| m.map(|m| m.round(&row.currency, settings.rounding));

    let interest = Portion::of(round(prepared.accruable_interest()), row.accrued_interest_income, None);
    let fee = Portion::of(round(prepared.fee_income()), row.accrued_fee_income, row.credited_fee);
    let penalty = Portion::of(round(prepared.penalty_income()), row.accrued_penalty_income, row.credited_penalty);

    let posting_date = match settings.policy {
        AccrualPolicy::DueDate => row.due_date,
        AccrualPolicy::SubmittedDate => processing_date,
    };

    assemble(prepared, interest, fee, penalty, posting_date, row.due_date, processing_date)
}

/// Accrue an installment up to `till_date`, strictly before its due date.
///
/// Interest is prorated by days elapsed since the later of the period start
/// and the interest calculation start.
pub fn build_till_date(
    prepared: &PreparedAccrual,
    settings: &AccrualSettings,
    till_date: NaiveDate,
    processing_date: NaiveDate,
) -> Option<AccrualPosting> {
    let row = &prepared.schedule;

    let interest_start = row.interest_start_date();
    let total_days = (row.due_date - interest_start).num_days();

    let elapsed_from = match row.interest_calculated_from {
        Some(from) if row.from_date < from => from.min(till_date),
        _ => row.from_date,
    };
    let elapsed_days = (till_date - elapsed_from).num_days();

    let prorated = prepared.accruable_interest().map(|income| {
        income
            .prorate(elapsed_days, total_days)
            .round(&row.currency, settings.rounding)
    });

    let round = |m: Option<Money>| m.map(|m| m.round(&row.currency, settings.rounding));
    let interest = Portion::of(prorated, row.accrued_interest_income, None);
    let fee = Portion::of(round(prepared.fee_income()), row.accrued_fee_income, row.credited_fee);
    let penalty = Portion::of(round(prepared.penalty_income()), row.accrued_penalty_income, row.credited_penalty);

    assemble(prepared, interest, fee, penalty, till_date, till_date, processing_date)
}

fn assemble(
    prepared: &PreparedAccrual,
    interest: Portion,
    fee: Portion,
    penalty: Portion,
    posting_date: NaiveDate,
    accrued_till: NaiveDate,
    processing_date: NaiveDate,
) -> Option<AccrualPosting> {
    let row = &prepared.schedule;
    let amount = interest.amount() + fee.amount() + penalty.amount();
    if !amount.is_positive() {
        debug!(
            loan_id = row.loan_id,
            installment = row.installment_number,
            "nothing new to accrue"
        );
        return None;
    }

    let id = Uuid::new_v4();
    let transaction = AccrualTransaction {
        id,
        loan_id: row.loan_id,
        office_id: row.office_id,
        transaction_type: LedgerTransactionType::Accrual,
        transaction_date: posting_date,
        submitted_on_date: processing_date,
        amount,
        interest_portion: interest.delta,
        fee_charges_portion: fee.delta,
        penalty_charges_portion: penalty.delta,
        currency: row.currency.clone(),
    };

    let charges_paid = prepared
        .charges
        .allocations
        .iter()
        .map(|a| ChargePaidBy {
            loan_transaction_id: id,
            loan_charge_id: a.loan_charge_id,
            amount: a.amount,
            installment_number: row.installment_number,
        })
        .collect();

    debug!(
        loan_id = row.loan_id,
        installment = row.installment_number,
        amount = %amount,
        date = %posting_date,
        "accrual built"
    );

    Some(AccrualPosting {
        transaction,
        charges_paid,
        allocations: prepared.charges.allocations.clone(),
        schedule_update: ScheduleAccrualUpdate {
            repayment_schedule_id: row.repayment_schedule_id,
            installment_number: row.installment_number,
            accrued_interest: interest.total,
            accrued_fee: fee.total,
            accrued_penalty: penalty.total,
        },
        accrued_till,
    })
}
