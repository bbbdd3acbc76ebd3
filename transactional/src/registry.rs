//! Process-wide default client.
//!
//! Application code that reaches the database through this registry instead
//! of an explicitly passed `DbClient` is redirected by any test context built
//! around the registered client. One owner registers it, usually the test
//! setup; swapping it while a context is active is unsupported.

use crate::client::DbClient;
use crate::error::{ContextError, TransactionError};
use crate::manager::Manager;
use std::future::Future;
use std::sync::{PoisonError, RwLock};

static DEFAULT_CLIENT: RwLock<Option<DbClient>> = RwLock::new(None);

/// Registers `client` as the default, returning the one it replaces.
pub fn register(client: DbClient) -> Option<DbClient> {
    DEFAULT_CLIENT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(client)
}

pub fn clear() -> Option<DbClient> {
    DEFAULT_CLIENT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

pub fn client() -> Result<DbClient, ContextError> {
    DEFAULT_CLIENT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(ContextError::NoDefaultClient)
}

pub fn get_manager() -> Result<Manager, ContextError> {
    Ok(client()?.manager())
}

pub async fn transaction<F, Fut, T, E>(work: F) -> Result<T, TransactionError<E>>
where
    F: FnOnce(Manager) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let client = client()?;
    client.transaction(work).await
}
