use sea_orm::DbErr;
use thiserror::Error;

/// Errors raised by the test context and the redirected client.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context already started")]
    AlreadyStarted,

    #[error("Context not started. You must call \"start\" before finishing it.")]
    NotStarted,

    #[error("Transaction requires a unit of work when an isolation level is supplied")]
    MissingCallback,

    #[error("No default database client registered")]
    NoDefaultClient,

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Outcome of a failed run-in-transaction call.
///
/// `Work` carries the unit of work's own error unchanged, everything the
/// client itself fails on is `Context`.
#[derive(Debug, Error)]
pub enum TransactionError<E> {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Work(E),
}

impl<E> TransactionError<E> {
    pub fn into_work(self) -> Option<E> {
        match self {
            TransactionError::Work(e) => Some(e),
            TransactionError::Context(_) => None,
        }
    }
}

impl<E> From<DbErr> for TransactionError<E> {
    fn from(err: DbErr) -> Self {
        TransactionError::Context(ContextError::Database(err))
    }
}
