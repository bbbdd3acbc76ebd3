use crate::client::{DbClient, RedirectionGuard};
use crate::error::{ContextError, TransactionError};
use crate::handle::{PinnedHandle, ResourceHandle};
use crate::manager::Manager;
use crate::registry;
use crate::strategy::Strategies;
use sea_orm::DbErr;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// One isolated, always rolled back test transaction.
///
/// Between `start` and `finish` every handle, manager and transaction the
/// client hands out is bound to a single connection with one open
/// transaction; nested transactions run inside it without a boundary of
/// their own. `finish` rolls everything back and puts the client's previous
/// strategies back in place.
///
/// Only one context may redirect a given client at a time.
pub struct TransactionalTestContext {
    client: DbClient,
    active: Option<ActiveContext>,
}

struct ActiveContext {
    handle: Arc<dyn ResourceHandle>,
    guard: RedirectionGuard,
}

impl ActiveContext {
    async fn close(self) -> Result<(), DbErr> {
        self.guard.restore();
        self.handle.release().await
    }
}

impl TransactionalTestContext {
    pub fn new(client: DbClient) -> Self {
        Self {
            client,
            active: None,
        }
    }

    /// Context around the client registered as the process default.
    pub fn for_default_client() -> Result<Self, ContextError> {
        Ok(Self::new(registry::client()?))
    }

    pub fn client(&self) -> &DbClient {
        &self.client
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn manager(&self) -> Manager {
        self.client.manager()
    }

    pub async fn start(&mut self) -> Result<(), ContextError> {
        if self.active.is_some() {
            return Err(ContextError::AlreadyStarted);
        }

        let handle = self.client.create_handle();
        if let Err(e) = handle.connect().await {
            release_after_failure(handle.as_ref()).await;
            return Err(e.into());
        }

        let guard = self
            .client
            .redirect(Strategies::pinned(PinnedHandle::new(handle.clone())));

        if let Err(e) = handle.start_transaction(None).await {
            guard.restore();
            release_after_failure(handle.as_ref()).await;
            return Err(e.into());
        }

        info!("Transactional test context started");
        self.active = Some(ActiveContext { handle, guard });
        Ok(())
    }

    pub async fn finish(&mut self) -> Result<(), ContextError> {
        let active = self.active.take().ok_or(ContextError::NotStarted)?;

        let rolled_back = active.handle.rollback_transaction().await;
        let closed = active.close().await;

        match rolled_back.and(closed) {
            Ok(()) => {
                info!("Transactional test context finished");
                Ok(())
            }
            Err(e) => {
                warn!("Transactional test context finished with errors: {}", e);
                Err(e.into())
            }
        }
    }
}

impl Drop for TransactionalTestContext {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("Transactional test context dropped without finish; restoring client");
        }
    }
}

async fn release_after_failure(handle: &dyn ResourceHandle) {
    if let Err(e) = handle.release().await {
        warn!("Failed to release handle after start failure: {}", e);
    }
}

/// Runs `work` inside a fresh context on `client` and always finishes it.
///
/// An error from `work` wins over an error from finishing.
pub async fn with_test_context<F, Fut, T, E>(
    client: &DbClient,
    work: F,
) -> Result<T, TransactionError<E>>
where
    F: FnOnce(Manager) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut context = TransactionalTestContext::new(client.clone());
    context.start().await?;

    let outcome = work(context.manager()).await;
    let finished = context.finish().await;

    match outcome {
        Ok(value) => {
            finished?;
            Ok(value)
        }
        Err(e) => {
            if let Err(finish_err) = finished {
                warn!("Failed to finish test context after work error: {}", finish_err);
            }
            Err(TransactionError::Work(e))
        }
    }
}
