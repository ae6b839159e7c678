mod audit_service;
mod core;
mod error;
mod fx_service;
mod ledger_service;
mod payout_service;
mod reconciliation_service;
mod settlement_service;
mod wallet_service;

pub use audit_service::*;
pub use self::core::*;
pub use error::*;
pub use fx_service::*;
pub use ledger_service::*;
pub use payout_service::*;
pub use reconciliation_service::*;
pub use settlement_service::*;
pub use wallet_service::*;
