use crate::error::{ContextError, TransactionError};
use crate::handle::ResourceHandle;
use crate::manager::Manager;
use crate::strategy::Strategies;
use common::config::{CommonConfig, PoolConfig};
use futures::future::BoxFuture;
use sea_orm::{Database, DatabaseConnection, DbErr, IsolationLevel};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// The two call shapes of the run-in-transaction entry point.
pub enum TransactionCall<F> {
    Work(F),
    /// An isolation level with an optional unit of work; a missing unit of
    /// work is rejected with `ContextError::MissingCallback`.
    Isolated(IsolationLevel, Option<F>),
}

impl<F> TransactionCall<F> {
    pub fn isolated(isolation: IsolationLevel, work: F) -> Self {
        TransactionCall::Isolated(isolation, Some(work))
    }

    fn resolve(self) -> Result<(Option<IsolationLevel>, F), ContextError> {
        match self {
            TransactionCall::Work(work) => Ok((None, work)),
            TransactionCall::Isolated(isolation, Some(work)) => Ok((Some(isolation), work)),
            TransactionCall::Isolated(_, None) => Err(ContextError::MissingCallback),
        }
    }
}

/// Type-erased unit of work, handy when the call shape is built dynamically.
pub type BoxedWork<T, E> = Box<dyn FnOnce(Manager) -> BoxFuture<'static, Result<T, E>> + Send>;

struct ClientInner {
    db: DatabaseConnection,
    strategies: RwLock<Strategies>,
    redirections: AtomicUsize,
}

/// Database client with injectable handle factory and transaction runner.
///
/// Clones share the connection pool and the installed strategies, so a
/// redirection installed through one clone applies to all of them.
#[derive(Clone)]
pub struct DbClient {
    inner: Arc<ClientInner>,
}

impl DbClient {
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_strategies(db, Strategies::standard())
    }

    /// Client routing through `strategies` instead of the standard pair.
    pub fn with_strategies(db: DatabaseConnection, strategies: Strategies) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                db,
                strategies: RwLock::new(strategies),
                redirections: AtomicUsize::new(0),
            }),
        }
    }

    pub async fn connect(config: &CommonConfig, pool: &PoolConfig) -> Result<Self, DbErr> {
        debug!("Connecting database client for {}", config.project_name);
        let db = Database::connect(pool.connect_options(&config.database_url)).await?;
        Ok(Self::new(db))
    }

    /// The underlying pool, bypassing any active redirection.
    ///
    /// Queries through it do not see the test transaction. With a single
    /// pooled connection they wait on the pinned handle until the acquire
    /// timeout while a context is active; go through [`DbClient::manager`]
    /// instead.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.inner.db
    }

    pub fn strategies(&self) -> Strategies {
        self.inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_redirected(&self) -> bool {
        self.inner.redirections.load(Ordering::SeqCst) > 0
    }

    /// New resource handle from the current factory.
    pub fn create_handle(&self) -> Arc<dyn ResourceHandle> {
        self.strategies().factory.create_handle(&self.inner.db)
    }

    /// Active management interface.
    pub fn manager(&self) -> Manager {
        self.strategies().factory.manager(&self.inner.db)
    }

    /// Runs `work` in a transaction through the current runner.
    pub async fn transaction<F, Fut, T, E>(&self, work: F) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(Manager) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.transaction_with(TransactionCall::Work(work)).await
    }

    pub async fn transaction_with<F, Fut, T, E>(
        &self,
        call: TransactionCall<F>,
    ) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(Manager) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (isolation, work) = call.resolve()?;
        let runner = self.strategies().runner;
        let scope = runner.enter(self, isolation).await?;

        let outcome = work(scope.manager()).await;
        let completed = scope.complete(outcome.is_ok()).await;

        match outcome {
            Ok(value) => {
                completed?;
                Ok(value)
            }
            Err(e) => {
                if let Err(complete_err) = completed {
                    warn!("Failed to roll back after unit of work error: {}", complete_err);
                }
                Err(TransactionError::Work(e))
            }
        }
    }

    /// Installs `strategies` until the returned guard is restored or dropped.
    pub fn redirect(&self, strategies: Strategies) -> RedirectionGuard {
        let active = self.inner.redirections.fetch_add(1, Ordering::SeqCst);
        if active > 0 {
            warn!(
                active,
                "Installing a redirection while another one is active; \
                 concurrent test contexts are unsupported"
            );
        }
        let previous = self.replace_strategies(strategies);
        RedirectionGuard {
            client: self.clone(),
            saved: Some(previous),
        }
    }

    fn replace_strategies(&self, strategies: Strategies) -> Strategies {
        let mut current = self
            .inner
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, strategies)
    }
}

/// Puts the saved strategies back exactly once.
pub struct RedirectionGuard {
    client: DbClient,
    saved: Option<Strategies>,
}

impl RedirectionGuard {
    pub fn restore(mut self) {
        self.restore_saved();
    }

    fn restore_saved(&mut self) {
        if let Some(previous) = self.saved.take() {
            self.client.replace_strategies(previous);
            self.client.inner.redirections.fetch_sub(1, Ordering::SeqCst);
            debug!("Restored database client strategies");
        }
    }
}

impl Drop for RedirectionGuard {
    fn drop(&mut self) {
        self.restore_saved();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::AbsorbingRunner;
    use common::test_helpers::{
        count_rows, create_test_connection_with, get_test_in_memory_database_url,
    };
    use sea_orm::ConnectionTrait;

    async fn test_client() -> DbClient {
        let db = create_test_connection_with(
            &get_test_in_memory_database_url(),
            &PoolConfig::default(),
        )
        .await
        .unwrap();
        db.execute_unprepared("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .await
            .unwrap();
        DbClient::new(db)
    }

    #[tokio::test]
    async fn test_standard_transaction_commits_on_success() {
        let client = test_client().await;

        let inserted = client
            .transaction(|manager| async move {
                manager
                    .execute_unprepared("INSERT INTO person (name) VALUES ('Aragorn')")
                    .await?;
                Ok::<_, DbErr>(1)
            })
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(count_rows(client.connection(), "person").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_standard_transaction_rolls_back_on_error() {
        let client = test_client().await;

        let result = client
            .transaction(|manager| async move {
                manager
                    .execute_unprepared("INSERT INTO person (name) VALUES ('Boromir')")
                    .await?;
                Err::<(), _>(DbErr::Custom("this error triggers a rollback".into()))
            })
            .await;

        assert!(matches!(result, Err(TransactionError::Work(DbErr::Custom(_)))));
        assert_eq!(count_rows(client.connection(), "person").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_isolation_without_work_is_rejected() {
        let client = test_client().await;

        let result = client
            .transaction_with(TransactionCall::<BoxedWork<(), DbErr>>::Isolated(
                IsolationLevel::Serializable,
                None,
            ))
            .await;

        assert!(matches!(
            result,
            Err(TransactionError::Context(ContextError::MissingCallback))
        ));
    }

    #[tokio::test]
    async fn test_boxed_work_runs() {
        let client = test_client().await;
        let work: BoxedWork<u64, DbErr> = Box::new(|manager| {
            Box::pin(async move {
                manager
                    .execute_unprepared("INSERT INTO person (name) VALUES ('Faramir')")
                    .await?;
                Ok(7)
            })
        });

        let value = client
            .transaction_with(TransactionCall::Work(work))
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(count_rows(client.connection(), "person").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_redirection_guard_restores_on_drop() {
        let client = test_client().await;
        assert!(!client.is_redirected());

        {
            let manager = client.manager();
            let _guard = client.redirect(Strategies {
                factory: client.strategies().factory,
                runner: std::sync::Arc::new(AbsorbingRunner::new(manager)),
            });
            assert!(client.is_redirected());
        }

        assert!(!client.is_redirected());
        let result = client
            .transaction(|manager| async move {
                manager
                    .execute_unprepared("INSERT INTO person (name) VALUES ('Merry')")
                    .await?;
                Err::<(), _>(DbErr::Custom("rollback".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(count_rows(client.connection(), "person").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nested_guards_restore_in_order() {
        let client = test_client().await;

        let outer = client.redirect(Strategies::standard());
        let inner = client.redirect(Strategies::standard());
        assert!(client.is_redirected());

        inner.restore();
        assert!(client.is_redirected());
        outer.restore();
        assert!(!client.is_redirected());
    }
}
