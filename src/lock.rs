use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbBackend, Statement, TransactionTrait, Value,
};

use crate::config::{AdvisoryLockStrategy, ClosureTreeConfig};
use crate::error::ClosureTreeError;

/// Transaction every closure mutation runs in.
///
/// On PostgreSQL the configured isolation level is requested and the
/// namespaced advisory lock is taken at transaction scope, so it is released
/// by commit or rollback alike. SQLite serializes writers on its own, so both
/// settings are skipped there.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
}

impl LockedTransaction {
    pub async fn acquire<C>(config: &ClosureTreeConfig, db: &C) -> Result<Self, ClosureTreeError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let postgres = db.get_database_backend() == DbBackend::Postgres;
        let key = match config.advisory_lock_strategy() {
            AdvisoryLockStrategy::Namespaced(key) if postgres => Some(key.as_str().to_owned()),
            _ => None,
        };
        let isolation = if postgres {
            config.isolation_level()
        } else {
            None
        };

        let txn = db.begin_with_config(isolation, None).await?;

        if let Some(ref key) = key {
            if let Err(err) = acquire_lock(&txn, key).await {
                let _ = txn.rollback().await;
                return Err(err);
            }
        }

        Ok(Self { txn })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Commits when `result` is `Ok`, rolls back otherwise, and hands `result` back.
    pub async fn finish<T>(
        self,
        result: Result<T, ClosureTreeError>,
    ) -> Result<T, ClosureTreeError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after failed mutation failed");
                }
                Err(err)
            }
        }
    }

    pub async fn commit(self) -> Result<(), ClosureTreeError> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), ClosureTreeError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), ClosureTreeError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1), 0)",
        vec![Value::from(key)],
    ))
    .await?;
    Ok(())
}
