mod audit;
mod directory;
mod fx;
mod hashing;
mod ledger;
mod money;
mod payout;
mod reconciliation;
mod settlement;
mod tax;
mod wallet;

pub use audit::*;
pub use directory::*;
pub use fx::*;
pub use hashing::*;
pub use ledger::*;
pub use money::*;
pub use payout::*;
pub use reconciliation::*;
pub use settlement::*;
pub use tax::*;
pub use wallet::*;
