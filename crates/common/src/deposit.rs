use crate::chain::Chain;
use crate::error::CoreError;
use crate::ids::{DepositId, UserId, WalletId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `pending -> confirmed -> off_ramp_completed -> broker_funded`,
/// `pending -> failed`, `confirmed -> failed` (reconciliation only),
/// `off_ramp_completed -> failed` (brokerage bridge only). Every other
/// transition is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Confirmed,
    OffRampCompleted,
    BrokerFunded,
    Failed,
}

impl DepositStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DepositStatus::Failed | DepositStatus::BrokerFunded | DepositStatus::OffRampCompleted
        )
    }

    /// The actor is relevant only to distinguish `confirmed -> failed`, which
    /// is restricted to the reconciliation engine.
    pub fn validate_transition(
        from: DepositStatus,
        to: DepositStatus,
        by_reconciliation: bool,
    ) -> Result<(), CoreError> {
        use DepositStatus::*;
        let allowed = match (from, to) {
            (Pending, Confirmed) => true,
            (Confirmed, OffRampCompleted) => true,
            (OffRampCompleted, BrokerFunded) => true,
            (Pending, Failed) => true,
            (Confirmed, Failed) => by_reconciliation,
            // A deposit that cleared off-ramp can still fail brokerage
            // funding (account inactive, broker rejection, permanent
            // adapter error); this is always the brokerage bridge's own
            // call, never reconciliation's.
            (OffRampCompleted, Failed) => !by_reconciliation,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    pub user_id: UserId,
    pub chain: Chain,
    pub tx_hash: Option<String>,
    pub provider_event_id: Option<String>,
    pub token_code: String,
    pub amount: Money,
    pub source_address: Option<String>,
    pub destination_wallet_id: Option<WalletId>,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub broker_funded_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Deposit {
    pub fn pending_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = DepositStatus> {
        prop_oneof![
            Just(DepositStatus::Pending),
            Just(DepositStatus::Confirmed),
            Just(DepositStatus::OffRampCompleted),
            Just(DepositStatus::BrokerFunded),
            Just(DepositStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn no_transition_ever_leaves_a_terminal_status(
            from in any_status(),
            to in any_status(),
            by_reconciliation in any::<bool>(),
        ) {
            // Failed and BrokerFunded are true dead ends; OffRampCompleted is
            // terminal for reconciliation's purposes but the brokerage bridge
            // is still allowed to fail it.
            if matches!(from, DepositStatus::Failed | DepositStatus::BrokerFunded) {
                prop_assert!(DepositStatus::validate_transition(from, to, by_reconciliation).is_err());
            }
        }

        #[test]
        fn confirmed_to_failed_requires_reconciliation(to in any_status()) {
            if to == DepositStatus::Failed {
                prop_assert!(DepositStatus::validate_transition(DepositStatus::Confirmed, to, true).is_ok());
                prop_assert!(DepositStatus::validate_transition(DepositStatus::Confirmed, to, false).is_err());
            }
        }

        #[test]
        fn off_ramp_completed_to_failed_requires_non_reconciliation(to in any_status()) {
            if to == DepositStatus::Failed {
                prop_assert!(DepositStatus::validate_transition(DepositStatus::OffRampCompleted, to, false).is_ok());
                prop_assert!(DepositStatus::validate_transition(DepositStatus::OffRampCompleted, to, true).is_err());
            }
        }
    }
}
