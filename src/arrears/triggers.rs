use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AccrualSettings;
use crate::errors::Result;
use crate::events::BusinessEventSink;
use crate::store::ArrearsStore;
use crate::types::LoanId;

use super::{update_live_arrears, update_original_arrears, ArrearsChange};

/// loan business events after which arrears are recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanBusinessEvent {
    Repayment { loan_id: LoanId },
    Refund { loan_id: LoanId },
    AdjustTransaction { loan_id: LoanId },
    GoodwillCredit { loan_id: LoanId },
    PayoutRefund { loan_id: LoanId },
    UndoWriteOff { loan_id: LoanId },
    WaiveInterest { loan_id: LoanId },
    AddCharge { loan_id: LoanId },
    WaiveCharge { loan_id: LoanId },
    ChargePayment { loan_id: LoanId },
    ApplyOverdueCharge { loan_id: LoanId },
    Disbursement { loan_id: LoanId },
    Foreclosure { loan_id: LoanId },
    BalanceChanged { loan_id: LoanId },
}

impl LoanBusinessEvent {
    pub fn loan_id(&self) -> LoanId {
        match *self {
            LoanBusinessEvent::Repayment { loan_id }
            | LoanBusinessEvent::Refund { loan_id }
            | LoanBusinessEvent::AdjustTransaction { loan_id }
            | LoanBusinessEvent::GoodwillCredit { loan_id }
            | LoanBusinessEvent::PayoutRefund { loan_id }
            | LoanBusinessEvent::UndoWriteOff { loan_id }
            | LoanBusinessEvent::WaiveInterest { loan_id }
            | LoanBusinessEvent::AddCharge { loan_id }
            | LoanBusinessEvent::WaiveCharge { loan_id }
            | LoanBusinessEvent::ChargePayment { loan_id }
            | LoanBusinessEvent::ApplyOverdueCharge { loan_id }
            | LoanBusinessEvent::Disbursement { loan_id }
            | LoanBusinessEvent::Foreclosure { loan_id }
            | LoanBusinessEvent::BalanceChanged { loan_id } => loan_id,
        }
    }

    /// disbursement always ages against the live schedule
    pub fn forces_live_schedule(&self) -> bool {
        matches!(self, LoanBusinessEvent::Disbursement { .. })
    }
}

/// Typed dispatcher from loan business events to arrears recomputation.
///
/// Called directly by whoever commits the event, after the commit.
pub struct ArrearsTrigger {
    settings: AccrualSettings,
    time: SafeTimeProvider,
}

impl ArrearsTrigger {
    pub fn new(settings: AccrualSettings, time: SafeTimeProvider) -> Self {
        Self { settings, time }
    }

    pub fn handle(
        &self,
        event: LoanBusinessEvent,
        store: &mut dyn ArrearsStore,
        events: &mut dyn BusinessEventSink,
    ) -> Result<ArrearsChange> {
        let loan_id = event.loan_id();
        let business_date = self.time.now().date_naive();

        let original = !event.forces_live_schedule()
            && store.arrears_profile(loan_id)?.uses_original_schedule(&self.settings);

        debug!(loan_id, ?event, original, "recomputing arrears");

        let change = if original {
            update_original_arrears(store, &[loan_id], &self.settings, business_date)?
                .pop()
                .unwrap_or(ArrearsChange::Delete(loan_id))
        } else {
            update_live_arrears(store, loan_id, business_date)?
        };

        events.publish(change.to_event());
        Ok(change)
    }
}
