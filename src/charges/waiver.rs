use serde::{Deserialize, Serialize};
use tracing::info;

use crate::decimal::Money;
use crate::errors::{AccrualError, Result, WaiveRefusal};
use crate::types::LoanStatus;

use super::{LoanChargeData, LoanInstallmentChargeData};

/// result of waiving or un-waiving a charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaiveChargeOutcome {
    pub charge: LoanChargeData,
    pub installment_number: Option<u32>,
    pub amount: Money,
    /// part of `amount` that had already been accrued as income
    pub recognized: Money,
    /// part of `amount` that was never accrued
    pub unrecognized: Money,
}

/// Waive the outstanding amount of a charge.
///
/// Installment fees waive a single installment: the one given, or the first
/// with anything outstanding.
pub fn waive_charge(
    status: LoanStatus,
    charge: &LoanChargeData,
    installment_number: Option<u32>,
) -> Result<WaiveChargeOutcome> {
    let refuse = |reason| AccrualError::ChargeCannotBeWaived {
        charge_id: charge.id,
        reason,
    };

    if !status.is_active() {
        return Err(refuse(WaiveRefusal::LoanInactive));
    }
    if charge.is_waived() {
        return Err(refuse(WaiveRefusal::AlreadyWaived));
    }
    if charge.is_paid() {
        return Err(refuse(WaiveRefusal::AlreadyPaid));
    }

    let mut updated = charge.clone();

    let (number, amount, recognized) = if charge.is_installment_fee {
        let row = target_installment(&mut updated, installment_number)?;
        if row.is_waived() {
            return Err(refuse(WaiveRefusal::AlreadyWaived));
        }
        if row.is_paid() {
            return Err(refuse(WaiveRefusal::AlreadyPaid));
        }
        let amount = row.amount_outstanding();
        let recognized = recognized_part(amount, row.accrued(), row.amount_paid);
        row.amount_waived += amount;
        row.amount_unrecognized = Some(row.unrecognized() + (amount - recognized));
        (Some(row.installment_number), amount, recognized)
    } else {
        let amount = charge.amount_outstanding();
        (None, amount, recognized_part(amount, charge.accrued(), charge.amount_paid))
    };

    let unrecognized = amount - recognized;
    updated.amount_waived += amount;
    updated.amount_unrecognized = (updated.unrecognized() + unrecognized).non_zero();

    info!(
        loan_charge_id = charge.id,
        installment = ?number,
        amount = %amount,
        unrecognized = %unrecognized,
        "charge waived"
    );

    Ok(WaiveChargeOutcome {
        charge: updated,
        installment_number: number,
        amount,
        recognized,
        unrecognized,
    })
}

/// Reverse a previous waiver, restoring the outstanding amount.
///
/// Installment fees need the installment whose waiver is undone.
pub fn undo_waive_charge(
    status: LoanStatus,
    charge: &LoanChargeData,
    installment_number: Option<u32>,
) -> Result<WaiveChargeOutcome> {
    if !status.is_active() {
        return Err(AccrualError::InvalidLoanStatus { status });
    }
    let not_waived = AccrualError::ChargeNotWaived {
        charge_id: charge.id,
    };
    if !charge.amount_waived.is_positive() {
        return Err(not_waived);
    }

    let mut updated = charge.clone();

    let (amount, unrecognized) = if charge.is_installment_fee {
        let number = installment_number.ok_or(AccrualError::InstallmentNotFound {
            charge_id: charge.id,
            installment_number: 0,
        })?;
        let row = updated
            .installment_charges
            .iter_mut()
            .find(|r| r.installment_number == number)
            .ok_or(AccrualError::InstallmentNotFound {
                charge_id: charge.id,
                installment_number: number,
            })?;
        if !row.amount_waived.is_positive() {
            return Err(not_waived);
        }
        let restored = (row.amount_waived, row.unrecognized());
        row.amount_waived = Money::ZERO;
        row.amount_unrecognized = None;
        restored
    } else {
        (charge.amount_waived, charge.unrecognized())
    };

    updated.amount_waived = updated.amount_waived.saturating_sub(amount);
    updated.amount_unrecognized = updated.unrecognized().saturating_sub(unrecognized).non_zero();

    info!(
        loan_charge_id = charge.id,
        installment = ?installment_number,
        amount = %amount,
        "charge waiver undone"
    );

    Ok(WaiveChargeOutcome {
        charge: updated,
        installment_number: if charge.is_installment_fee { installment_number } else { None },
        amount,
        recognized: amount - unrecognized,
        unrecognized,
    })
}

/// Record a charge adjustment of `amount` against the charge.
pub fn adjust_charge(status: LoanStatus, charge: &LoanChargeData, amount: Money) -> Result<LoanChargeData> {
    let adjustable_status = matches!(
        status,
        LoanStatus::Active | LoanStatus::ClosedObligationsMet | LoanStatus::Overpaid
    );
    if !adjustable_status {
        return Err(AccrualError::ChargeAdjustment {
            code: "loan.charge.adjustment.invalid.status".to_string(),
            message: format!("adjustment is not supported for the status of {status:?}"),
        });
    }
    if !amount.is_positive() {
        return Err(AccrualError::InvalidAmount { amount });
    }
    if amount > charge.amount {
        return Err(AccrualError::ChargeAdjustment {
            code: "loan.charge.adjustment.invalid.amount".to_string(),
            message: format!("amount cannot be higher than the charge amount: {}", charge.amount),
        });
    }
    let available = charge.amount.saturating_sub(charge.amount_adjusted);
    if amount > available {
        return Err(AccrualError::ChargeAdjustment {
            code: "loan.charge.adjustment.invalid.amount".to_string(),
            message: format!("amount cannot be higher than the available charge amount for adjustment: {available}"),
        });
    }

    let mut updated = charge.clone();
    updated.amount_adjusted += amount;
    Ok(updated)
}

/// accrued-but-unpaid share of a waiver
fn recognized_part(waived: Money, accrued: Money, paid: Money) -> Money {
    waived.min(accrued.saturating_sub(paid))
}

fn target_installment(
    charge: &mut LoanChargeData,
    installment_number: Option<u32>,
) -> Result<&mut LoanInstallmentChargeData> {
    let charge_id = charge.id;
    let found = match installment_number {
        Some(number) => charge
            .installment_charges
            .iter_mut()
            .find(|r| r.installment_number == number),
        None => charge
            .installment_charges
            .iter_mut()
            .find(|r| r.amount_outstanding().is_positive()),
    };
    found.ok_or(AccrualError::InstallmentNotFound {
        charge_id,
        installment_number: installment_number.unwrap_or(0),
    })
}
