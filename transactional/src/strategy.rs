use crate::client::DbClient;
use crate::error::ContextError;
use crate::handle::{PinnedHandle, ResourceHandle, SeaOrmHandle};
use crate::manager::Manager;
use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr, IsolationLevel};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the client gets new resource handles and its management interface.
pub trait ResourceFactory: Send + Sync {
    fn create_handle(&self, db: &DatabaseConnection) -> Arc<dyn ResourceHandle>;
    fn manager(&self, db: &DatabaseConnection) -> Manager;
}

/// How the client opens the scope a unit of work runs in.
#[async_trait]
pub trait TransactionRunner: Send + Sync {
    async fn enter(
        &self,
        client: &DbClient,
        isolation: Option<IsolationLevel>,
    ) -> Result<WorkScope, ContextError>;
}

/// The pair of entry points a `DbClient` routes through.
#[derive(Clone)]
pub struct Strategies {
    pub factory: Arc<dyn ResourceFactory>,
    pub runner: Arc<dyn TransactionRunner>,
}

impl Strategies {
    pub fn standard() -> Self {
        Self {
            factory: Arc::new(PoolFactory),
            runner: Arc::new(BeginTransactionRunner),
        }
    }

    /// Everything bound to one pinned handle, nested transactions absorbed.
    pub fn pinned(handle: PinnedHandle) -> Self {
        let manager = handle.manager();
        Self {
            factory: Arc::new(FixedHandleFactory::new(handle)),
            runner: Arc::new(AbsorbingRunner::new(manager)),
        }
    }
}

impl Default for Strategies {
    fn default() -> Self {
        Self::standard()
    }
}

/// A fresh handle per caller, pool-bound manager.
pub struct PoolFactory;

impl ResourceFactory for PoolFactory {
    fn create_handle(&self, db: &DatabaseConnection) -> Arc<dyn ResourceHandle> {
        Arc::new(SeaOrmHandle::new(db.clone()))
    }

    fn manager(&self, db: &DatabaseConnection) -> Manager {
        Manager::Connection(db.clone())
    }
}

/// The same pinned handle for every caller.
pub struct FixedHandleFactory {
    handle: Arc<PinnedHandle>,
}

impl FixedHandleFactory {
    pub fn new(handle: PinnedHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }
}

impl ResourceFactory for FixedHandleFactory {
    fn create_handle(&self, _db: &DatabaseConnection) -> Arc<dyn ResourceHandle> {
        self.handle.clone()
    }

    fn manager(&self, _db: &DatabaseConnection) -> Manager {
        self.handle.manager()
    }
}

/// Scope of one unit of work.
pub enum WorkScope {
    /// A transaction opened for this unit of work alone.
    Owned(Arc<dyn ResourceHandle>),
    /// Work folded into a transaction someone else owns.
    Absorbed(Manager),
}

impl WorkScope {
    pub fn manager(&self) -> Manager {
        match self {
            WorkScope::Owned(handle) => handle.manager(),
            WorkScope::Absorbed(manager) => manager.clone(),
        }
    }

    /// Commits or rolls back an owned scope and releases its handle.
    ///
    /// The release runs even when the commit or rollback fails; the first
    /// error is returned. Absorbed scopes have nothing to complete.
    pub async fn complete(self, succeeded: bool) -> Result<(), DbErr> {
        let handle = match self {
            WorkScope::Owned(handle) => handle,
            WorkScope::Absorbed(_) => return Ok(()),
        };

        let finished = if succeeded {
            handle.commit_transaction().await
        } else {
            handle.rollback_transaction().await
        };
        let released = handle.release().await;

        finished?;
        released
    }
}

/// Standard behaviour: every unit of work gets its own transaction.
pub struct BeginTransactionRunner;

#[async_trait]
impl TransactionRunner for BeginTransactionRunner {
    async fn enter(
        &self,
        client: &DbClient,
        isolation: Option<IsolationLevel>,
    ) -> Result<WorkScope, ContextError> {
        let handle = client.create_handle();
        let opened = match handle.connect().await {
            Ok(()) => handle.start_transaction(isolation).await,
            Err(e) => Err(e),
        };

        if let Err(e) = opened {
            if let Err(release_err) = handle.release().await {
                warn!("Failed to release handle after begin failure: {}", release_err);
            }
            return Err(e.into());
        }
        Ok(WorkScope::Owned(handle))
    }
}

/// Runs every unit of work directly on one manager, without a boundary.
pub struct AbsorbingRunner {
    manager: Manager,
}

impl AbsorbingRunner {
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TransactionRunner for AbsorbingRunner {
    async fn enter(
        &self,
        _client: &DbClient,
        isolation: Option<IsolationLevel>,
    ) -> Result<WorkScope, ContextError> {
        if isolation.is_some() {
            debug!(?isolation, "Ignoring isolation level for absorbed transaction");
        }
        debug!("Absorbing nested transaction into {:?}", self.manager);
        Ok(WorkScope::Absorbed(self.manager.clone()))
    }
}
