pub mod account;
pub mod audit;
pub mod chain;
pub mod deposit;
pub mod error;
pub mod ids;
pub mod job;
pub mod ledger;
pub mod money;

pub use account::{Currency, VirtualAccountStatus, WalletStatus};
pub use audit::AuditLogEntry;
pub use chain::{Chain, ChainFamily};
pub use deposit::{Deposit, DepositStatus};
pub use error::{CoreError, ErrorType};
pub use ids::{
    DepositId, JobId, LedgerAccountId, LedgerTransactionId, UserId, VirtualAccountId, WalletId,
    WithdrawalId,
};
pub use job::JobStatus;
pub use ledger::{AccountType, EntryDirection, TransactionStatus, TransactionType};
pub use money::Money;

/// Default minimum accepted deposit amount; overridable via `funding-config`.
pub const DEFAULT_MIN_DEPOSIT_USD: &str = "1.00";

/// Default threshold above which a balance change triggers a large-change
/// notification.
pub const DEFAULT_LARGE_DEPOSIT_THRESHOLD_USD: &str = "10000.00";
