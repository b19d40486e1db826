use serde::{Deserialize, Serialize};

/// Closed set of per-user (plus one system) ledger accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    UsdcBalance,
    FiatExposure,
    PendingInvestment,
    SpendBuffer,
    InvestBuffer,
    /// System-owned, not scoped to a user; holds unconfirmed deposit value
    /// between on-chain recognition and allocation.
    DepositSuspense,
}

impl AccountType {
    pub fn is_system(&self) -> bool {
        matches!(self, AccountType::DepositSuspense)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Investment,
    Conversion,
    InternalTransfer,
    AllocationSplit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Investment => "investment",
            TransactionType::Conversion => "conversion",
            TransactionType::InternalTransfer => "internal_transfer",
            TransactionType::AllocationSplit => "allocation_split",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Reversed,
}
