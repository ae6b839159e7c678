use crate::domain::MarketplaceDirectory;
use crate::storage::Repository;

use super::{
    AppError, AuditLogService, FxService, LedgerService, PaymentSettlementService, PayoutService,
    ReconciliationService, WalletService,
};

/// Facade wiring the whole settlement core over one connection pool.
///
/// The marketplace directory is the core's read-only view of bookings,
/// properties and agents; it is seeded by the host application (or from a
/// JSON file in the CLI) before settlements run.
pub struct SettlementCore {
    repo: Repository,
    directory: MarketplaceDirectory,
    pub wallets: WalletService,
    pub ledger: LedgerService,
    pub fx: FxService,
    pub settlements: PaymentSettlementService,
    pub payouts: PayoutService,
    pub reconciliation: ReconciliationService,
    pub audit: AuditLogService,
}

impl SettlementCore {
    pub fn new(repo: Repository) -> Self {
        Self {
            wallets: WalletService::new(repo.clone()),
            ledger: LedgerService::new(repo.clone()),
            fx: FxService::new(repo.clone()),
            settlements: PaymentSettlementService::new(repo.clone()),
            payouts: PayoutService::new(repo.clone()),
            reconciliation: ReconciliationService::new(repo.clone()),
            audit: AuditLogService::new(repo.clone()),
            directory: MarketplaceDirectory::new(),
            repo,
        }
    }

    /// Connect to an existing database at the given path.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Initialize a new database at the given path (create + migrate).
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn directory(&self) -> &MarketplaceDirectory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut MarketplaceDirectory {
        &mut self.directory
    }

    /// Replace the whole directory (e.g. after loading it from a file).
    pub fn set_directory(&mut self, directory: MarketplaceDirectory) {
        self.directory = directory;
    }
}
