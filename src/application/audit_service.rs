use sqlx::SqliteConnection;

use crate::domain::{verify_audit_chain, AuditCategory, AuditDraft, AuditLog};
use crate::storage::Repository;

use super::AppError;

/// Append-only writer for the global compliance log. Every mutating call in
/// the settlement core records at least one chained row here. Business logic
/// only writes; the compliance export is the read path.
pub struct AuditLogService {
    repo: Repository,
}

impl AuditLogService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Append a row within an already-open transaction, chaining it onto the
    /// head read on the same connection.
    pub async fn record_in(conn: &mut SqliteConnection, draft: AuditDraft) -> Result<AuditLog, AppError> {
        let sequence = Repository::next_sequence_in(conn, "audit_sequence").await?;
        let previous = Repository::audit_chain_head_in(conn).await?;
        let log = draft.seal(sequence, previous, chrono::Utc::now());
        Repository::insert_audit_log_in(conn, &log).await?;
        Ok(log)
    }

    /// Append a standalone row in its own transaction.
    pub async fn record(&self, draft: AuditDraft) -> Result<AuditLog, AppError> {
        let mut tx = self.repo.begin().await?;
        let log = Self::record_in(&mut *tx, draft).await?;
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(log)
    }

    pub async fn list(
        &self,
        category: Option<AuditCategory>,
        limit: Option<usize>,
    ) -> Result<Vec<AuditLog>, AppError> {
        Ok(self.repo.list_audit_logs(category, limit).await?)
    }

    /// Walk the whole chain; returns the sequence index of the first bad row.
    pub async fn verify_chain(&self) -> Result<Option<usize>, AppError> {
        let logs = self.repo.list_audit_logs(None, None).await?;
        let result = verify_audit_chain(&logs);
        if let Some(index) = result {
            tracing::error!(index, "audit chain verification failed");
        }
        Ok(result)
    }
}
