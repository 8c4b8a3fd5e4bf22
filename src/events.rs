use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{LoanId, TransactionId};

/// all events published by accrual and arrears processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoanEvent {
    // accrual events
    AccrualTransactionCreated {
        loan_id: LoanId,
        transaction_id: TransactionId,
        installment_number: u32,
        amount: Money,
        transaction_date: NaiveDate,
    },
    AccruedTillAdvanced {
        loan_id: LoanId,
        accrued_till: NaiveDate,
    },

    // arrears events
    ArrearsUpdated {
        loan_id: LoanId,
        total_overdue: Money,
        overdue_since_date: NaiveDate,
    },
    ArrearsCleared {
        loan_id: LoanId,
    },
}

impl LoanEvent {
    pub fn loan_id(&self) -> LoanId {
        match self {
            LoanEvent::AccrualTransactionCreated { loan_id, .. }
            | LoanEvent::AccruedTillAdvanced { loan_id, .. }
            | LoanEvent::ArrearsUpdated { loan_id, .. }
            | LoanEvent::ArrearsCleared { loan_id } => *loan_id,
        }
    }
}

/// downstream listener for committed loan events (e.g. delinquency tagging)
pub trait BusinessEventSink {
    fn publish(&mut self, event: LoanEvent);
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<LoanEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: LoanEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<LoanEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[LoanEvent] {
        &self.events
    }

    pub fn events_for(&self, loan_id: LoanId) -> impl Iterator<Item = &LoanEvent> {
        self.events.iter().filter(move |e| e.loan_id() == loan_id)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl BusinessEventSink for EventStore {
    fn publish(&mut self, event: LoanEvent) {
        self.emit(event);
    }
}
