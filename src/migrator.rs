use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_stock_quants_table::Migration),
            Box::new(m20240601_000002_create_stock_moves_table::Migration),
        ]
    }
}

mod m20240601_000001_create_stock_quants_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_stock_quants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Aligned with entities::stock_quant Model
            manager
                .create_table(
                    Table::create()
                        .table(StockQuants::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(StockQuants::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(StockQuants::ProductId).big_integer().not_null())
                        .col(ColumnDef::new(StockQuants::LocationId).big_integer().not_null())
                        .col(
                            ColumnDef::new(StockQuants::Quantity)
                                .decimal_len(16, 6)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockQuants::ReservedQuantity)
                                .decimal_len(16, 6)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockQuants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_quants_product_location")
                        .table(StockQuants::Table)
                        .col(StockQuants::ProductId)
                        .col(StockQuants::LocationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockQuants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockQuants {
        Table,
        Id,
        ProductId,
        LocationId,
        Quantity,
        ReservedQuantity,
        UpdatedAt,
    }
}

mod m20240601_000002_create_stock_moves_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_stock_moves_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Aligned with entities::stock_move Model
            manager
                .create_table(
                    Table::create()
                        .table(StockMoves::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(StockMoves::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(StockMoves::Kind).string().not_null())
                        .col(ColumnDef::new(StockMoves::ProductId).big_integer().not_null())
                        .col(ColumnDef::new(StockMoves::Quantity).decimal_len(16, 6).not_null())
                        .col(
                            ColumnDef::new(StockMoves::SourceLocationId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMoves::DestinationLocationId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMoves::OrderId).big_integer().not_null())
                        .col(ColumnDef::new(StockMoves::OrderLineId).big_integer().not_null())
                        .col(
                            ColumnDef::new(StockMoves::ProcurementGroupId)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(StockMoves::WarehouseId).big_integer().not_null())
                        .col(
                            ColumnDef::new(StockMoves::SourceWarehouseId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMoves::OperationTypeId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMoves::Origin).string().not_null())
                        .col(
                            ColumnDef::new(StockMoves::PropagateCancel)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(StockMoves::PredecessorId).uuid().null())
                        .col(ColumnDef::new(StockMoves::SuccessorId).uuid().null())
                        .col(ColumnDef::new(StockMoves::State).string().not_null())
                        .col(
                            ColumnDef::new(StockMoves::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMoves::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_moves_order_line_id")
                        .table(StockMoves::Table)
                        .col(StockMoves::OrderLineId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_moves_state")
                        .table(StockMoves::Table)
                        .col(StockMoves::State)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMoves::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockMoves {
        Table,
        Id,
        Kind,
        ProductId,
        Quantity,
        SourceLocationId,
        DestinationLocationId,
        OrderId,
        OrderLineId,
        ProcurementGroupId,
        WarehouseId,
        SourceWarehouseId,
        OperationTypeId,
        Origin,
        PropagateCancel,
        PredecessorId,
        SuccessorId,
        State,
        CreatedAt,
        UpdatedAt,
    }
}

// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    let result = Migrator::up(&db, None).await;

    match result {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
