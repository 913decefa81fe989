//! Ledger schema.
//!
//! - `assets`: registered and auto-registered assets with cached balances
//! - `utxos`: outputs reported by the last chain snapshot
//! - `allocations`: asset amounts bound to outputs
//! - `transfers`: send/receive/issuance rows and their lifecycle
//! - `invoices`: issued receive invoices
//! - `receive_utxo_data`: expected asset and amount per blinded invoice
//! - `reconciliation_warnings`: received allocations that did not match
//! - `sync_state`: freshness of the allocation view

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Assets {
    Table,
    AssetId,
    Kind,
    Name,
    Ticker,
    Details,
    Precision,
    IssuedSupply,
    Visibility,
    SchemaId,
    IssuedAt,
    AddedAt,
    AutoRegistered,
    Settled,
    Future,
    Spendable,
    OffchainInbound,
    OffchainOutbound,
}

#[derive(Iden)]
enum Utxos {
    Table,
    Outpoint,
    Txid,
    Vout,
    BtcAmount,
    Colorable,
    Exists,
    FirstSeenAt,
}

#[derive(Iden)]
enum Allocations {
    Table,
    Id,
    Outpoint,
    AssetId,
    Amount,
    Settled,
}

#[derive(Iden)]
enum Transfers {
    Table,
    Idx,
    BatchTransferIdx,
    AssetId,
    Kind,
    Status,
    Txid,
    RecipientId,
    Expiration,
    RequestedAssignment,
    Assignments,
    ReceiveUtxo,
    ChangeUtxo,
    InvoiceString,
    TransportEndpoints,
    FailureReason,
    CreatedAt,
    UpdatedAt,
    Version,
}

#[derive(Iden)]
enum Invoices {
    Table,
    RecipientId,
    Invoice,
    Kind,
    AssetId,
    Amount,
    ExpirationTimestamp,
    BatchTransferIdx,
    TransportEndpoints,
    CreatedAt,
    CancelledAt,
}

#[derive(Iden)]
enum ReceiveUtxoData {
    Table,
    RecipientId,
    LinkedAsset,
    LinkedAmount,
    Invoice,
    BatchTransferIdx,
    ExpirationTimestamp,
}

#[derive(Iden)]
enum ReconciliationWarnings {
    Table,
    TransferIdx,
    RecipientId,
    ExpectedAsset,
    ExpectedAmount,
    ActualAsset,
    ActualAmount,
    DetectedAt,
}

#[derive(Iden)]
enum SyncState {
    Table,
    Id,
    LastSnapshotAt,
    Stale,
    DroppedAllocations,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Assets
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Assets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Assets::AssetId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Assets::Kind).string().not_null())
                    .col(ColumnDef::new(Assets::Name).string().not_null())
                    .col(ColumnDef::new(Assets::Ticker).string())
                    .col(ColumnDef::new(Assets::Details).text())
                    .col(
                        ColumnDef::new(Assets::Precision)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Assets::IssuedSupply).big_integer().not_null())
                    .col(
                        ColumnDef::new(Assets::Visibility)
                            .string()
                            .not_null()
                            .default("default"),
                    )
                    .col(ColumnDef::new(Assets::SchemaId).string())
                    .col(ColumnDef::new(Assets::IssuedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Assets::AddedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Assets::AutoRegistered)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Assets::Settled)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Assets::Future)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Assets::Spendable)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Assets::OffchainInbound).big_integer())
                    .col(ColumnDef::new(Assets::OffchainOutbound).big_integer())
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. UTXOs
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Utxos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Utxos::Outpoint)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Utxos::Txid).string().not_null())
                    .col(ColumnDef::new(Utxos::Vout).big_integer().not_null())
                    .col(ColumnDef::new(Utxos::BtcAmount).big_integer().not_null())
                    .col(ColumnDef::new(Utxos::Colorable).boolean().not_null())
                    .col(
                        ColumnDef::new(Utxos::Exists)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Utxos::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Allocations
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Allocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Allocations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Allocations::Outpoint).string().not_null())
                    .col(ColumnDef::new(Allocations::AssetId).string().not_null())
                    .col(ColumnDef::new(Allocations::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Allocations::Settled).boolean().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-allocations-outpoint")
                            .from(Allocations::Table, Allocations::Outpoint)
                            .to(Utxos::Table, Utxos::Outpoint)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocations-outpoint")
                    .table(Allocations::Table)
                    .col(Allocations::Outpoint)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocations-asset_id")
                    .table(Allocations::Table)
                    .col(Allocations::AssetId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Transfers
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Transfers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transfers::Idx)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Transfers::BatchTransferIdx)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transfers::AssetId).string().not_null())
                    .col(ColumnDef::new(Transfers::Kind).string().not_null())
                    .col(ColumnDef::new(Transfers::Status).string().not_null())
                    .col(ColumnDef::new(Transfers::Txid).string())
                    .col(ColumnDef::new(Transfers::RecipientId).string())
                    .col(ColumnDef::new(Transfers::Expiration).timestamp_with_time_zone())
                    .col(ColumnDef::new(Transfers::RequestedAssignment).text())
                    .col(ColumnDef::new(Transfers::Assignments).text().not_null())
                    .col(ColumnDef::new(Transfers::ReceiveUtxo).string())
                    .col(ColumnDef::new(Transfers::ChangeUtxo).string())
                    .col(ColumnDef::new(Transfers::InvoiceString).text())
                    .col(
                        ColumnDef::new(Transfers::TransportEndpoints)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transfers::FailureReason).text())
                    .col(
                        ColumnDef::new(Transfers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transfers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transfers::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transfers-asset_id")
                            .from(Transfers::Table, Transfers::AssetId)
                            .to(Assets::Table, Assets::AssetId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transfers-recipient_id")
                    .table(Transfers::Table)
                    .col(Transfers::RecipientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transfers-asset_id")
                    .table(Transfers::Table)
                    .col(Transfers::AssetId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transfers-batch_transfer_idx")
                    .table(Transfers::Table)
                    .col(Transfers::BatchTransferIdx)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 5. Invoices
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Invoices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Invoices::RecipientId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Invoices::Invoice).text().not_null())
                    .col(ColumnDef::new(Invoices::Kind).string().not_null())
                    .col(ColumnDef::new(Invoices::AssetId).string())
                    .col(ColumnDef::new(Invoices::Amount).big_integer())
                    .col(ColumnDef::new(Invoices::ExpirationTimestamp).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Invoices::BatchTransferIdx)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invoices::TransportEndpoints)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Invoices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Invoices::CancelledAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 6. Receive expectations
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(ReceiveUtxoData::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReceiveUtxoData::RecipientId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReceiveUtxoData::LinkedAsset)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReceiveUtxoData::LinkedAmount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReceiveUtxoData::Invoice).text().not_null())
                    .col(
                        ColumnDef::new(ReceiveUtxoData::BatchTransferIdx)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReceiveUtxoData::ExpirationTimestamp)
                            .timestamp_with_time_zone(),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 7. Reconciliation warnings
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(ReconciliationWarnings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReconciliationWarnings::TransferIdx)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationWarnings::RecipientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationWarnings::ExpectedAsset)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationWarnings::ExpectedAmount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationWarnings::ActualAsset)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationWarnings::ActualAmount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationWarnings::DetectedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 8. Sync state
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(SyncState::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncState::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncState::LastSnapshotAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(SyncState::Stale)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncState::DroppedAllocations)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Children before parents
        manager
            .drop_table(Table::drop().table(SyncState::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ReconciliationWarnings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ReceiveUtxoData::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Invoices::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transfers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Allocations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Utxos::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Assets::Table).to_owned())
            .await?;
        Ok(())
    }
}
