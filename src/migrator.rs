use sea_orm::DbBackend;
use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalogue_tables::Migration),
            Box::new(m20240101_000002_create_stock_tables::Migration),
            Box::new(m20240101_000003_create_worksheet_tables::Migration),
            Box::new(m20240101_000004_create_audit_logs_table::Migration),
        ]
    }
}

/// Money column. SQLite gets a REAL column because its NUMERIC affinity stores
/// whole amounts as integers, which the driver refuses to decode as decimals.
fn money<T: IntoIden>(column: T, backend: DbBackend) -> ColumnDef {
    let mut def = ColumnDef::new(column);
    match backend {
        DbBackend::Sqlite => def.double(),
        _ => def.decimal_len(19, 4),
    };
    def.not_null().default(0);
    def
}

// Migration implementations

mod m20240101_000001_create_catalogue_tables {
    use super::money;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalogue_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let backend = manager.get_database_backend();

            manager
                .create_table(
                    Table::create()
                        .table(Suppliers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Suppliers::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(Suppliers::Name)
                                .string_len(100)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Suppliers::ContactPerson).string_len(100).null())
                        .col(ColumnDef::new(Suppliers::Email).string_len(120).null())
                        .col(ColumnDef::new(Suppliers::Phone).string_len(40).null())
                        .col(
                            ColumnDef::new(Suppliers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StorageLocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StorageLocations::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StorageLocations::Name).string_len(100).not_null())
                        .col(ColumnDef::new(StorageLocations::Code).string_len(50).null())
                        .col(ColumnDef::new(StorageLocations::ParentId).integer().null())
                        .col(ColumnDef::new(StorageLocations::LocationType).string_len(50).null())
                        .col(ColumnDef::new(StorageLocations::Description).text().null())
                        .col(
                            ColumnDef::new(StorageLocations::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(StorageLocations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_storage_locations_parent")
                                .from(StorageLocations::Table, StorageLocations::ParentId)
                                .to(StorageLocations::Table, StorageLocations::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Parts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Parts::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Parts::Sku).string_len(50).not_null().unique_key())
                        .col(ColumnDef::new(Parts::Name).string_len(100).not_null())
                        .col(ColumnDef::new(Parts::Description).text().null())
                        .col(ColumnDef::new(Parts::Category).string_len(50).null())
                        .col(ColumnDef::new(Parts::Unit).string_len(20).not_null())
                        .col(money(Parts::BuyPrice, backend))
                        .col(money(Parts::SellPrice, backend))
                        .col(
                            ColumnDef::new(Parts::SafetyStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Parts::ReorderQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Parts::SupplierId).integer().null())
                        .col(
                            ColumnDef::new(Parts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Parts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_parts_supplier")
                                .from(Parts::Table, Parts::SupplierId)
                                .to(Suppliers::Table, Suppliers::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_parts_category")
                        .table(Parts::Table)
                        .col(Parts::Category)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Parts::Table).if_exists().to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StorageLocations::Table).if_exists().to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Suppliers::Table).if_exists().to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Suppliers {
        Table,
        Id,
        Name,
        ContactPerson,
        Email,
        Phone,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub enum StorageLocations {
        Table,
        Id,
        Name,
        Code,
        ParentId,
        LocationType,
        Description,
        IsActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Parts {
        Table,
        Id,
        Sku,
        Name,
        Description,
        Category,
        Unit,
        BuyPrice,
        SellPrice,
        SafetyStock,
        ReorderQuantity,
        SupplierId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_stock_tables {
    use super::m20240101_000001_create_catalogue_tables::{Parts, StorageLocations, Suppliers};
    use super::money;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_stock_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let backend = manager.get_database_backend();

            manager
                .create_table(
                    Table::create()
                        .table(InventoryLevels::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryLevels::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryLevels::PartId)
                                .integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryLevels::QuantityOnHand)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(InventoryLevels::QuantityOnHand).gte(0)),
                        )
                        .col(
                            ColumnDef::new(InventoryLevels::QuantityReserved)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InventoryLevels::BinLocation).string_len(50).null())
                        .col(
                            ColumnDef::new(InventoryLevels::LastUpdated)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_levels_part")
                                .from(InventoryLevels::Table, InventoryLevels::PartId)
                                .to(Parts::Table, Parts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockTransactions::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockTransactions::PartId).integer().not_null())
                        .col(
                            ColumnDef::new(StockTransactions::TransactionType)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransactions::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(StockTransactions::Quantity).ne(0)),
                        )
                        .col(ColumnDef::new(StockTransactions::ReferenceId).integer().null())
                        .col(
                            ColumnDef::new(StockTransactions::ReferenceType)
                                .string_len(20)
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransactions::UserId).integer().null())
                        .col(ColumnDef::new(StockTransactions::Notes).text().null())
                        .col(
                            ColumnDef::new(StockTransactions::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_transactions_part")
                                .from(StockTransactions::Table, StockTransactions::PartId)
                                .to(Parts::Table, Parts::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockBatches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockBatches::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockBatches::PartId).integer().not_null())
                        .col(
                            ColumnDef::new(StockBatches::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(StockBatches::Quantity).gt(0)),
                        )
                        .col(
                            ColumnDef::new(StockBatches::QuantityRemaining)
                                .integer()
                                .not_null()
                                .check(Expr::col(StockBatches::QuantityRemaining).gte(0)),
                        )
                        .col(money(StockBatches::UnitPrice, backend))
                        .col(
                            ColumnDef::new(StockBatches::ReceivedDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockBatches::SupplierId).integer().null())
                        .col(ColumnDef::new(StockBatches::InvoiceNumber).string_len(50).null())
                        .col(ColumnDef::new(StockBatches::Notes).text().null())
                        .col(ColumnDef::new(StockBatches::StockTransactionId).integer().null())
                        .col(ColumnDef::new(StockBatches::StorageLocationId).integer().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_batches_part")
                                .from(StockBatches::Table, StockBatches::PartId)
                                .to(Parts::Table, Parts::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_batches_supplier")
                                .from(StockBatches::Table, StockBatches::SupplierId)
                                .to(Suppliers::Table, Suppliers::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_batches_transaction")
                                .from(StockBatches::Table, StockBatches::StockTransactionId)
                                .to(StockTransactions::Table, StockTransactions::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_batches_location")
                                .from(StockBatches::Table, StockBatches::StorageLocationId)
                                .to(StorageLocations::Table, StorageLocations::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_batches_fifo")
                        .table(StockBatches::Table)
                        .col(StockBatches::PartId)
                        .col(StockBatches::ReceivedDate)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PartLocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PartLocations::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PartLocations::PartId).integer().not_null())
                        .col(
                            ColumnDef::new(PartLocations::StorageLocationId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PartLocations::Quantity)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(PartLocations::Quantity).gte(0)),
                        )
                        .col(
                            ColumnDef::new(PartLocations::AssignedDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PartLocations::LastMovementDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PartLocations::Notes).text().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_part_locations_part")
                                .from(PartLocations::Table, PartLocations::PartId)
                                .to(Parts::Table, Parts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_part_locations_location")
                                .from(PartLocations::Table, PartLocations::StorageLocationId)
                                .to(StorageLocations::Table, StorageLocations::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("uq_part_locations_part_location")
                        .table(PartLocations::Table)
                        .col(PartLocations::PartId)
                        .col(PartLocations::StorageLocationId)
                        .unique()
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PartLocations::Table).if_exists().to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockBatches::Table).if_exists().to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockTransactions::Table).if_exists().to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryLevels::Table).if_exists().to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryLevels {
        Table,
        Id,
        PartId,
        QuantityOnHand,
        QuantityReserved,
        BinLocation,
        LastUpdated,
    }

    #[derive(DeriveIden)]
    pub enum StockTransactions {
        Table,
        Id,
        PartId,
        TransactionType,
        Quantity,
        ReferenceId,
        ReferenceType,
        UserId,
        Notes,
        Timestamp,
    }

    #[derive(DeriveIden)]
    enum StockBatches {
        Table,
        Id,
        PartId,
        Quantity,
        QuantityRemaining,
        UnitPrice,
        ReceivedDate,
        SupplierId,
        InvoiceNumber,
        Notes,
        StockTransactionId,
        StorageLocationId,
    }

    #[derive(DeriveIden)]
    enum PartLocations {
        Table,
        Id,
        PartId,
        StorageLocationId,
        Quantity,
        AssignedDate,
        LastMovementDate,
        Notes,
    }
}

mod m20240101_000003_create_worksheet_tables {
    use super::m20240101_000001_create_catalogue_tables::Parts;
    use super::m20240101_000002_create_stock_tables::StockTransactions;
    use super::money;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_worksheet_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let backend = manager.get_database_backend();

            manager
                .create_table(
                    Table::create()
                        .table(Worksheets::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Worksheets::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Worksheets::MachineId).integer().not_null())
                        .col(ColumnDef::new(Worksheets::Title).string_len(200).not_null())
                        .col(ColumnDef::new(Worksheets::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Worksheets::AssignedToUserId).integer().null())
                        .col(
                            ColumnDef::new(Worksheets::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Worksheets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Worksheets::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(WorksheetParts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WorksheetParts::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(WorksheetParts::WorksheetId).integer().not_null())
                        .col(ColumnDef::new(WorksheetParts::PartId).integer().not_null())
                        .col(
                            ColumnDef::new(WorksheetParts::StockTransactionId)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WorksheetParts::QuantityUsed)
                                .integer()
                                .not_null()
                                .check(Expr::col(WorksheetParts::QuantityUsed).gt(0)),
                        )
                        .col(money(WorksheetParts::UnitCostAtTime, backend))
                        .col(ColumnDef::new(WorksheetParts::Notes).text().null())
                        .col(
                            ColumnDef::new(WorksheetParts::AddedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_worksheet_parts_worksheet")
                                .from(WorksheetParts::Table, WorksheetParts::WorksheetId)
                                .to(Worksheets::Table, Worksheets::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_worksheet_parts_part")
                                .from(WorksheetParts::Table, WorksheetParts::PartId)
                                .to(Parts::Table, Parts::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_worksheet_parts_transaction")
                                .from(WorksheetParts::Table, WorksheetParts::StockTransactionId)
                                .to(StockTransactions::Table, StockTransactions::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WorksheetParts::Table).if_exists().to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Worksheets::Table).if_exists().to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Worksheets {
        Table,
        Id,
        MachineId,
        Title,
        Status,
        AssignedToUserId,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum WorksheetParts {
        Table,
        Id,
        WorksheetId,
        PartId,
        StockTransactionId,
        QuantityUsed,
        UnitCostAtTime,
        Notes,
        AddedAt,
    }
}

mod m20240101_000004_create_audit_logs_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_audit_logs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AuditLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AuditLogs::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(AuditLogs::Category).string_len(30).not_null())
                        .col(ColumnDef::new(AuditLogs::ActionType).string_len(30).not_null())
                        .col(ColumnDef::new(AuditLogs::EntityType).string_len(30).not_null())
                        .col(ColumnDef::new(AuditLogs::EntityId).integer().null())
                        .col(ColumnDef::new(AuditLogs::UserId).integer().null())
                        .col(ColumnDef::new(AuditLogs::Description).text().not_null())
                        .col(ColumnDef::new(AuditLogs::Metadata).text().null())
                        .col(
                            ColumnDef::new(AuditLogs::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_audit_logs_entity")
                        .table(AuditLogs::Table)
                        .col(AuditLogs::EntityType)
                        .col(AuditLogs::EntityId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AuditLogs::Table).if_exists().to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AuditLogs {
        Table,
        Id,
        Category,
        ActionType,
        EntityType,
        EntityId,
        UserId,
        Description,
        Metadata,
        CreatedAt,
    }
}
