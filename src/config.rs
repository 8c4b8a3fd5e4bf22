use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::decimal::MoneyRounding;
use crate::errors::{AccrualError, Result};
use crate::types::{AccountingMethod, AccrualPolicy};

/// external configuration service
pub trait ConfigurationProvider {
    /// active charge accrual policy
    fn accrual_policy(&self) -> Result<AccrualPolicy>;

    /// whether arrears are computed against the originally issued schedule
    fn arrears_on_original_schedule(&self) -> bool {
        false
    }
}

/// settings for one accrual or arrears run, read once and passed down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccrualSettings {
    pub policy: AccrualPolicy,
    pub accounting_method: AccountingMethod,
    pub rounding: MoneyRounding,
    pub retry: RetryPolicy,
    pub arrears: ArrearsSettings,
}

impl Default for AccrualSettings {
    fn default() -> Self {
        Self {
            policy: AccrualPolicy::DueDate,
            accounting_method: AccountingMethod::AccrualPeriodic,
            rounding: MoneyRounding::HalfEven,
            retry: RetryPolicy::default(),
            arrears: ArrearsSettings::default(),
        }
    }
}

impl AccrualSettings {
    /// settings with the given charge policy and defaults elsewhere
    pub fn with_policy(policy: AccrualPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// freeze the provider's values for the duration of a run
    pub fn snapshot(provider: &dyn ConfigurationProvider, base: &AccrualSettings) -> Result<Self> {
        let mut settings = base.clone();
        settings.policy = provider.accrual_policy()?;
        settings.arrears.on_original_schedule = provider.arrears_on_original_schedule();
        settings.validate()?;
        Ok(settings)
    }

    /// parse from json and validate
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: AccrualSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(AccrualError::InvalidConfiguration {
                message: "retry.maxAttempts must be at least 1".to_string(),
            });
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(AccrualError::InvalidConfiguration {
                message: "retry.maxDelayMs must not be below retry.baseDelayMs".to_string(),
            });
        }
        Ok(())
    }
}

/// arrears ageing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ArrearsSettings {
    /// compute against the frozen original schedule when the product asks for it
    pub on_original_schedule: bool,
    /// days after the due date before a period counts in original-schedule mode
    pub grace_on_arrears_ageing: u32,
}

/// bounded retry with exponential backoff and jitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            jitter_ms: 50,
        }
    }
}

impl RetryPolicy {
    /// retries without waiting, for tests and in-process stores
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// delay before retry number `attempt` (1-based), jitter excluded
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}
