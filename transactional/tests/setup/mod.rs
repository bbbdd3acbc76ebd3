use common::config::{CommonConfig, TestContextConfig};
use common::test_helpers::{get_test_database_url, truncate_tables};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, Schema, Set};
use std::error::Error;
use tokio::sync::OnceCell;
use transactional::{DbClient, logging};

pub mod person {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "person")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

// Global async setup: runs only once per test process
static SETUP: OnceCell<()> = OnceCell::const_new();

pub async fn ensure_setup() {
    SETUP
        .get_or_init(|| async {
            let config = TestContextConfig {
                log_level: "transactional=debug".to_string(),
                ..TestContextConfig::default()
            };
            // A subscriber may already be installed in this process
            logging::init_from_config(&config).ok();
        })
        .await;
}

/// Client on a fresh test database with an empty `person` table
pub async fn test_client() -> Result<DbClient, Box<dyn Error + Send + Sync>> {
    ensure_setup().await;
    let config = CommonConfig {
        project_name: "transactional-tests".to_string(),
        database_url: get_test_database_url(),
    };
    let client = DbClient::connect(&config, &TestContextConfig::default().pool).await?;
    let db = client.connection();

    let backend = db.get_database_backend();
    let mut create = Schema::new(backend).create_table_from_entity(person::Entity);
    create.if_not_exists();
    db.execute(backend.build(&create)).await?;
    truncate_tables(db, &["person"]).await?;

    Ok(client)
}

pub async fn save_person<C: ConnectionTrait>(db: &C, name: &str) -> Result<person::Model, DbErr> {
    person::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn count_people<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
    person::Entity::find().count(db).await
}
