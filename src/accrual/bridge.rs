use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::{CurrencyData, Money};
use crate::errors::Result;
use crate::schedule::LoanScheduleAccrualData;
use crate::types::{
    AccountingMethod, ChargeDefinitionId, LedgerTransactionType, LoanChargeId, LoanId, TransactionId,
};

use super::builder::AccrualPosting;

/// payload handed to the journal-entry sink for double-entry posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingBridgeData {
    pub loan_id: LoanId,
    pub loan_product_id: i64,
    pub office_id: i64,
    pub currency: CurrencyData,
    pub cash_based_accounting_enabled: bool,
    pub upfront_accrual_based_accounting_enabled: bool,
    pub periodic_accrual_based_accounting_enabled: bool,
    pub is_account_transfer: bool,
    pub is_charge_off: bool,
    pub is_fraud: bool,
    pub new_loan_transactions: Vec<BridgeTransaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransaction {
    pub id: TransactionId,
    pub office_id: i64,
    #[serde(rename = "type")]
    pub transaction_type: LedgerTransactionType,
    pub reversed: bool,
    pub date: NaiveDate,
    pub currency: CurrencyData,
    pub amount: Money,
    pub principal_portion: Option<Money>,
    pub interest_portion: Option<Money>,
    pub fee_charges_portion: Option<Money>,
    pub penalty_charges_portion: Option<Money>,
    pub over_payment_portion: Option<Money>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loan_charges_paid: Vec<BridgeChargePaid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeChargePaid {
    pub charge_id: ChargeDefinitionId,
    pub is_penalty: bool,
    pub loan_charge_id: LoanChargeId,
    pub amount: Money,
}

impl AccountingBridgeData {
    /// payload for one accrual posting on `row`'s loan
    pub fn for_posting(
        row: &LoanScheduleAccrualData,
        posting: &AccrualPosting,
        accounting_method: AccountingMethod,
    ) -> Self {
        let txn = &posting.transaction;
        let loan_charges_paid = posting
            .allocations
            .iter()
            .map(|a| BridgeChargePaid {
                charge_id: a.charge_id,
                is_penalty: a.is_penalty,
                loan_charge_id: a.loan_charge_id,
                amount: a.amount,
            })
            .collect();

        Self {
            loan_id: row.loan_id,
            loan_product_id: row.loan_product_id,
            office_id: row.office_id,
            currency: row.currency.clone(),
            cash_based_accounting_enabled: accounting_method.is_cash_based(),
            upfront_accrual_based_accounting_enabled: accounting_method.is_upfront_accrual(),
            periodic_accrual_based_accounting_enabled: accounting_method.is_periodic_accrual(),
            is_account_transfer: false,
            is_charge_off: false,
            is_fraud: false,
            new_loan_transactions: vec![BridgeTransaction {
                id: txn.id,
                office_id: txn.office_id,
                transaction_type: txn.transaction_type,
                reversed: false,
                date: txn.transaction_date,
                currency: txn.currency.clone(),
                amount: txn.amount,
                principal_portion: None,
                interest_portion: txn.interest_portion,
                fee_charges_portion: txn.fee_charges_portion,
                penalty_charges_portion: txn.penalty_charges_portion,
                over_payment_portion: None,
                loan_charges_paid,
            }],
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
