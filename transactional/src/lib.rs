//! Always rolled back database transactions for tests.
//!
//! A [`TransactionalTestContext`] pins a [`DbClient`] to one connection with
//! one open transaction between `start` and `finish`. Everything that goes
//! through the client meanwhile, including application code opening its own
//! transactions, runs inside that transaction, and `finish` rolls it all back.
//!
//! ```no_run
//! # async fn demo(client: transactional::DbClient) -> Result<(), transactional::ContextError> {
//! use transactional::TransactionalTestContext;
//!
//! let mut context = TransactionalTestContext::new(client.clone());
//! context.start().await?;
//! // ... exercise code that writes through `client` ...
//! context.finish().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod handle;
pub mod logging;
pub mod manager;
pub mod registry;
pub mod strategy;

pub use client::{BoxedWork, DbClient, RedirectionGuard, TransactionCall};
pub use context::{TransactionalTestContext, with_test_context};
pub use error::{ContextError, TransactionError};
pub use handle::{PinnedHandle, ResourceHandle, SeaOrmHandle};
pub use manager::Manager;
pub use strategy::{
    AbsorbingRunner, BeginTransactionRunner, FixedHandleFactory, PoolFactory, ResourceFactory,
    Strategies, TransactionRunner, WorkScope,
};
