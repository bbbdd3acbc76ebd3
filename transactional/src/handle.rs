use crate::manager::Manager;
use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, ExecResult,
    IsolationLevel, QueryResult, Statement, TransactionTrait,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// One connection-scoped execution channel: connect, run at most one
/// transaction at a time, release.
#[async_trait]
pub trait ResourceHandle: Send + Sync {
    async fn connect(&self) -> Result<(), DbErr>;
    async fn start_transaction(&self, isolation: Option<IsolationLevel>) -> Result<(), DbErr>;
    async fn commit_transaction(&self) -> Result<(), DbErr>;
    async fn rollback_transaction(&self) -> Result<(), DbErr>;
    async fn release(&self) -> Result<(), DbErr>;

    /// Management interface bound to this handle.
    fn manager(&self) -> Manager;
}

enum HandleState {
    Created,
    Connected,
    InTransaction(DatabaseTransaction),
    Released,
}

impl HandleState {
    fn name(&self) -> &'static str {
        match self {
            HandleState::Created => "created",
            HandleState::Connected => "connected",
            HandleState::InTransaction(_) => "in transaction",
            HandleState::Released => "released",
        }
    }
}

struct HandleInner {
    id: u64,
    db: DatabaseConnection,
    state: RwLock<HandleState>,
}

/// `ResourceHandle` over a SeaORM connection pool.
///
/// Statements run on the open transaction when there is one, on the pool
/// when the handle is merely connected.
#[derive(Clone)]
pub struct SeaOrmHandle {
    inner: Arc<HandleInner>,
}

impl SeaOrmHandle {
    pub fn new(db: DatabaseConnection) -> Self {
        let id = HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst);
        debug!(handle = id, "Created resource handle");
        Self {
            inner: Arc::new(HandleInner {
                id,
                db,
                state: RwLock::new(HandleState::Created),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub async fn is_in_transaction(&self) -> bool {
        matches!(*self.inner.state.read().await, HandleState::InTransaction(_))
    }

    pub async fn is_released(&self) -> bool {
        matches!(*self.inner.state.read().await, HandleState::Released)
    }

    fn unusable(&self, state: &HandleState) -> DbErr {
        DbErr::Custom(format!(
            "Resource handle {} cannot run queries while {}",
            self.inner.id,
            state.name()
        ))
    }
}

#[async_trait]
impl ResourceHandle for SeaOrmHandle {
    async fn connect(&self) -> Result<(), DbErr> {
        let mut state = self.inner.state.write().await;
        match *state {
            HandleState::Created => {
                self.inner.db.ping().await?;
                *state = HandleState::Connected;
                debug!(handle = self.inner.id, "Connected resource handle");
                Ok(())
            }
            HandleState::Connected | HandleState::InTransaction(_) => Ok(()),
            HandleState::Released => Err(DbErr::Custom(format!(
                "Resource handle {} has been released",
                self.inner.id
            ))),
        }
    }

    async fn start_transaction(&self, isolation: Option<IsolationLevel>) -> Result<(), DbErr> {
        let mut state = self.inner.state.write().await;
        match *state {
            HandleState::Connected => {
                let txn = self.inner.db.begin_with_config(isolation, None).await?;
                *state = HandleState::InTransaction(txn);
                debug!(handle = self.inner.id, ?isolation, "Started transaction");
                Ok(())
            }
            HandleState::InTransaction(_) => Err(DbErr::Custom(format!(
                "Resource handle {} already has an active transaction",
                self.inner.id
            ))),
            ref other => Err(DbErr::Custom(format!(
                "Resource handle {} is not connected ({})",
                self.inner.id,
                other.name()
            ))),
        }
    }

    async fn commit_transaction(&self) -> Result<(), DbErr> {
        let mut state = self.inner.state.write().await;
        match std::mem::replace(&mut *state, HandleState::Connected) {
            HandleState::InTransaction(txn) => {
                txn.commit().await?;
                debug!(handle = self.inner.id, "Committed transaction");
                Ok(())
            }
            other => {
                let err = no_active_transaction(self.inner.id, &other);
                *state = other;
                Err(err)
            }
        }
    }

    async fn rollback_transaction(&self) -> Result<(), DbErr> {
        let mut state = self.inner.state.write().await;
        match std::mem::replace(&mut *state, HandleState::Connected) {
            HandleState::InTransaction(txn) => {
                txn.rollback().await?;
                debug!(handle = self.inner.id, "Rolled back transaction");
                Ok(())
            }
            other => {
                let err = no_active_transaction(self.inner.id, &other);
                *state = other;
                Err(err)
            }
        }
    }

    async fn release(&self) -> Result<(), DbErr> {
        let mut state = self.inner.state.write().await;
        let previous = std::mem::replace(&mut *state, HandleState::Released);
        if let HandleState::InTransaction(txn) = previous {
            debug!(handle = self.inner.id, "Rolling back open transaction on release");
            txn.rollback().await?;
        }
        debug!(handle = self.inner.id, "Released resource handle");
        Ok(())
    }

    fn manager(&self) -> Manager {
        Manager::Handle(self.clone())
    }
}

fn no_active_transaction(id: u64, state: &HandleState) -> DbErr {
    DbErr::Custom(format!(
        "Resource handle {} has no active transaction ({})",
        id,
        state.name()
    ))
}

#[async_trait]
impl ConnectionTrait for SeaOrmHandle {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.db.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let state = self.inner.state.read().await;
        match &*state {
            HandleState::InTransaction(txn) => txn.execute(stmt).await,
            HandleState::Connected => self.inner.db.execute(stmt).await,
            other => Err(self.unusable(other)),
        }
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let state = self.inner.state.read().await;
        match &*state {
            HandleState::InTransaction(txn) => txn.execute_unprepared(sql).await,
            HandleState::Connected => self.inner.db.execute_unprepared(sql).await,
            other => Err(self.unusable(other)),
        }
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let state = self.inner.state.read().await;
        match &*state {
            HandleState::InTransaction(txn) => txn.query_one(stmt).await,
            HandleState::Connected => self.inner.db.query_one(stmt).await,
            other => Err(self.unusable(other)),
        }
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let state = self.inner.state.read().await;
        match &*state {
            HandleState::InTransaction(txn) => txn.query_all(stmt).await,
            HandleState::Connected => self.inner.db.query_all(stmt).await,
            other => Err(self.unusable(other)),
        }
    }
}

/// Shares one handle with every caller while keeping its lifecycle with the
/// owner.
///
/// Callers may connect, begin, commit, roll back and release as they would
/// with a fresh handle; all of it is absorbed into the owner's transaction.
/// Only the owner drives the wrapped handle through `release_pinned` and the
/// handle it passed in.
#[derive(Clone)]
pub struct PinnedHandle {
    handle: Arc<dyn ResourceHandle>,
}

impl PinnedHandle {
    pub fn new(handle: Arc<dyn ResourceHandle>) -> Self {
        Self { handle }
    }

    pub async fn release_pinned(&self) -> Result<(), DbErr> {
        self.handle.release().await
    }
}

#[async_trait]
impl ResourceHandle for PinnedHandle {
    async fn connect(&self) -> Result<(), DbErr> {
        Ok(())
    }

    async fn start_transaction(&self, isolation: Option<IsolationLevel>) -> Result<(), DbErr> {
        debug!(?isolation, "Absorbed nested transaction start");
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), DbErr> {
        debug!("Absorbed nested transaction commit");
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), DbErr> {
        debug!("Absorbed nested transaction rollback");
        Ok(())
    }

    async fn release(&self) -> Result<(), DbErr> {
        Ok(())
    }

    fn manager(&self) -> Manager {
        self.handle.manager()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::count_rows;
    use common::test_helpers::get_test_in_memory_database_url;
    use common::{config::PoolConfig, create_test_connection_with};

    async fn people_db() -> DatabaseConnection {
        let db = create_test_connection_with(
            &get_test_in_memory_database_url(),
            &PoolConfig::default(),
        )
        .await
        .unwrap();
        db.execute_unprepared("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_handle_lifecycle_rolls_back() {
        let db = people_db().await;
        let handle = SeaOrmHandle::new(db.clone());

        handle.connect().await.unwrap();
        handle.start_transaction(None).await.unwrap();
        assert!(handle.is_in_transaction().await);

        handle
            .execute_unprepared("INSERT INTO person (name) VALUES ('Aragorn')")
            .await
            .unwrap();
        assert_eq!(count_rows(&handle, "person").await.unwrap(), 1);

        handle.rollback_transaction().await.unwrap();
        assert_eq!(count_rows(&handle, "person").await.unwrap(), 0);

        handle.release().await.unwrap();
        assert!(handle.is_released().await);
        assert_eq!(count_rows(&db, "person").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let db = people_db().await;
        let handle = SeaOrmHandle::new(db.clone());

        handle.connect().await.unwrap();
        handle.start_transaction(None).await.unwrap();
        handle
            .execute_unprepared("INSERT INTO person (name) VALUES ('Legolas')")
            .await
            .unwrap();
        handle.commit_transaction().await.unwrap();
        handle.release().await.unwrap();

        assert_eq!(count_rows(&db, "person").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_state_errors() {
        let db = people_db().await;
        let handle = SeaOrmHandle::new(db);

        assert!(handle.start_transaction(None).await.is_err());
        assert!(count_rows(&handle, "person").await.is_err());

        handle.connect().await.unwrap();
        assert!(handle.rollback_transaction().await.is_err());
        assert!(handle.commit_transaction().await.is_err());

        handle.start_transaction(None).await.unwrap();
        assert!(handle.start_transaction(None).await.is_err());

        handle.release().await.unwrap();
        handle.release().await.unwrap();
        assert!(handle.connect().await.is_err());
        assert!(count_rows(&handle, "person").await.is_err());
    }

    #[tokio::test]
    async fn test_release_rolls_back_open_transaction() {
        let db = people_db().await;
        let handle = SeaOrmHandle::new(db.clone());

        handle.connect().await.unwrap();
        handle.start_transaction(None).await.unwrap();
        handle
            .execute_unprepared("INSERT INTO person (name) VALUES ('Gimli')")
            .await
            .unwrap();
        handle.release().await.unwrap();

        assert_eq!(count_rows(&db, "person").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pinned_handle_absorbs_lifecycle_calls() {
        let db = people_db().await;
        let handle = SeaOrmHandle::new(db.clone());
        handle.connect().await.unwrap();
        handle.start_transaction(None).await.unwrap();

        let pinned = PinnedHandle::new(Arc::new(handle.clone()));
        pinned.connect().await.unwrap();
        pinned.start_transaction(Some(IsolationLevel::Serializable)).await.unwrap();
        pinned
            .manager()
            .execute_unprepared("INSERT INTO person (name) VALUES ('Pippin')")
            .await
            .unwrap();
        pinned.commit_transaction().await.unwrap();
        pinned.rollback_transaction().await.unwrap();
        pinned.release().await.unwrap();

        assert!(handle.is_in_transaction().await);
        assert_eq!(count_rows(&handle, "person").await.unwrap(), 1);

        pinned.release_pinned().await.unwrap();
        assert!(handle.is_released().await);
        assert_eq!(count_rows(&db, "person").await.unwrap(), 0);
    }
}
