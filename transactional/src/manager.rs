use crate::handle::SeaOrmHandle;
use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, ExecResult, QueryResult, Statement,
};

/// Resource-management interface handed to units of work.
///
/// Implements SeaORM's `ConnectionTrait`, so entities, selects and raw
/// statements run against it the same way whether it is bound to the pool
/// or to a single handle.
#[derive(Clone)]
pub enum Manager {
    Connection(DatabaseConnection),
    Handle(SeaOrmHandle),
}

impl Manager {
    pub fn is_handle_bound(&self) -> bool {
        matches!(self, Manager::Handle(_))
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Manager::Connection(_) => f.write_str("Manager::Connection"),
            Manager::Handle(handle) => write!(f, "Manager::Handle({})", handle.id()),
        }
    }
}

#[async_trait]
impl ConnectionTrait for Manager {
    fn get_database_backend(&self) -> DbBackend {
        match self {
            Manager::Connection(db) => db.get_database_backend(),
            Manager::Handle(handle) => handle.get_database_backend(),
        }
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        match self {
            Manager::Connection(db) => db.execute(stmt).await,
            Manager::Handle(handle) => handle.execute(stmt).await,
        }
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        match self {
            Manager::Connection(db) => db.execute_unprepared(sql).await,
            Manager::Handle(handle) => handle.execute_unprepared(sql).await,
        }
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        match self {
            Manager::Connection(db) => db.query_one(stmt).await,
            Manager::Handle(handle) => handle.query_one(stmt).await,
        }
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        match self {
            Manager::Connection(db) => db.query_all(stmt).await,
            Manager::Handle(handle) => handle.query_all(stmt).await,
        }
    }

    fn is_mock_connection(&self) -> bool {
        match self {
            Manager::Connection(db) => db.is_mock_connection(),
            Manager::Handle(_) => false,
        }
    }
}
