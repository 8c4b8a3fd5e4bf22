pub mod apportion;
pub mod waiver;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{ChargeDefinitionId, LoanChargeId};

pub use apportion::{apportion_charges, AccrualWindow, ChargeAllocation, ChargeApportionment};
pub use waiver::{adjust_charge, undo_waive_charge, waive_charge, WaiveChargeOutcome};

/// a charge instance attached to a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanChargeData {
    pub id: LoanChargeId,
    pub charge_id: ChargeDefinitionId,
    /// `None` for installment fees spread over the schedule
    pub due_date: Option<NaiveDate>,
    pub submitted_on_date: NaiveDate,
    pub amount: Money,
    #[serde(default)]
    pub amount_paid: Money,
    #[serde(default)]
    pub amount_waived: Money,
    #[serde(default)]
    pub amount_adjusted: Money,
    pub amount_accrued: Option<Money>,
    /// waived before it was ever recognized as income
    pub amount_unrecognized: Option<Money>,
    pub is_penalty: bool,
    pub is_installment_fee: bool,
    #[serde(default)]
    pub installment_charges: Vec<LoanInstallmentChargeData>,
}

impl LoanChargeData {
    /// specified-due-date charge
    pub fn due_on(
        id: LoanChargeId,
        charge_id: ChargeDefinitionId,
        due_date: NaiveDate,
        submitted_on_date: NaiveDate,
        amount: Money,
        is_penalty: bool,
    ) -> Self {
        Self {
            id,
            charge_id,
            due_date: Some(due_date),
            submitted_on_date,
            amount,
            amount_paid: Money::ZERO,
            amount_waived: Money::ZERO,
            amount_adjusted: Money::ZERO,
            amount_accrued: None,
            amount_unrecognized: None,
            is_penalty,
            is_installment_fee: false,
            installment_charges: Vec::new(),
        }
    }

    /// installment fee with one breakdown row per installment
    pub fn installment_fee(
        id: LoanChargeId,
        charge_id: ChargeDefinitionId,
        submitted_on_date: NaiveDate,
        installments: Vec<LoanInstallmentChargeData>,
    ) -> Self {
        let amount = installments.iter().map(|i| i.amount).sum();
        Self {
            id,
            charge_id,
            due_date: None,
            submitted_on_date,
            amount,
            amount_paid: Money::ZERO,
            amount_waived: Money::ZERO,
            amount_adjusted: Money::ZERO,
            amount_accrued: None,
            amount_unrecognized: None,
            is_penalty: false,
            is_installment_fee: true,
            installment_charges: installments,
        }
    }

    pub fn accrued(&self) -> Money {
        self.amount_accrued.unwrap_or(Money::ZERO)
    }

    pub fn unrecognized(&self) -> Money {
        self.amount_unrecognized.unwrap_or(Money::ZERO)
    }

    /// the most this charge can ever contribute to accrual
    pub fn accruable_amount(&self) -> Money {
        self.amount - self.unrecognized()
    }

    pub fn amount_outstanding(&self) -> Money {
        self.amount
            .saturating_sub(self.amount_paid + self.amount_waived + self.amount_adjusted)
    }

    pub fn is_waived(&self) -> bool {
        self.amount_waived.is_positive() && self.amount_outstanding().is_zero()
    }

    pub fn is_paid(&self) -> bool {
        !self.is_waived() && self.amount_outstanding().is_zero()
    }

    /// `amount - unrecognized >= accrued`
    pub fn satisfies_accrual_invariant(&self) -> bool {
        self.accruable_amount() >= self.accrued()
    }

    pub fn installment(&self, installment_number: u32) -> Option<&LoanInstallmentChargeData> {
        self.installment_charges
            .iter()
            .find(|i| i.installment_number == installment_number)
    }
}

/// per-installment share of an installment fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanInstallmentChargeData {
    pub installment_number: u32,
    pub due_date: NaiveDate,
    pub amount: Money,
    #[serde(default)]
    pub amount_paid: Money,
    #[serde(default)]
    pub amount_waived: Money,
    pub amount_accrued: Option<Money>,
    pub amount_unrecognized: Option<Money>,
}

impl LoanInstallmentChargeData {
    pub fn new(installment_number: u32, due_date: NaiveDate, amount: Money) -> Self {
        Self {
            installment_number,
            due_date,
            amount,
            amount_paid: Money::ZERO,
            amount_waived: Money::ZERO,
            amount_accrued: None,
            amount_unrecognized: None,
        }
    }

    pub fn accrued(&self) -> Money {
        self.amount_accrued.unwrap_or(Money::ZERO)
    }

    pub fn unrecognized(&self) -> Money {
        self.amount_unrecognized.unwrap_or(Money::ZERO)
    }

    pub fn accruable_amount(&self) -> Money {
        self.amount - self.unrecognized()
    }

    pub fn amount_outstanding(&self) -> Money {
        self.amount.saturating_sub(self.amount_paid + self.amount_waived)
    }

    pub fn is_waived(&self) -> bool {
        self.amount_waived.is_positive() && self.amount_outstanding().is_zero()
    }

    pub fn is_paid(&self) -> bool {
        !self.is_waived() && self.amount_outstanding().is_zero()
    }
}
