pub mod brokerage;
pub mod chain_custody;
pub mod error;
pub mod fake;
pub mod fiat;
pub mod notification;

pub use brokerage::{BrokerOrder, BrokerageAdapter, InstantFundingResult, OrderAmount, OrderSide, OrderStatus};
pub use chain_custody::ChainCustodyAdapter;
pub use error::AdapterError;
pub use fiat::{FiatDepositEvent, FiatVirtualAccountAdapter, VirtualAccountRef};
pub use notification::NotificationAdapter;
