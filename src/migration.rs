use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(Migration001CreateTables)]
    }
}

pub struct Migration001CreateTables;

impl MigrationName for Migration001CreateTables {
    fn name(&self) -> &str {
        "m001_create_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration001CreateTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // mail_accounts table
        manager
            .create_table(
                Table::create()
                    .table(MailAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MailAccounts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MailAccounts::Provider)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MailAccounts::Address)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(MailAccounts::PasswordEncrypted)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MailAccounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // messages table
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Messages::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Messages::AccountId).uuid().not_null())
                    .col(ColumnDef::new(Messages::Uid).string_len(255).not_null())
                    .col(ColumnDef::new(Messages::EmailFrom).text().null())
                    .col(ColumnDef::new(Messages::Title).text().null())
                    .col(
                        ColumnDef::new(Messages::DispatchDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Messages::ReceiptDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Messages::Text).text().null())
                    .col(
                        ColumnDef::new(Messages::MsgRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Messages::Files).json().null())
                    .col(
                        ColumnDef::new(Messages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Messages::Table, Messages::AccountId)
                            .to(MailAccounts::Table, MailAccounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Dedup key: one row per (account_id, uid)
        manager
            .create_index(
                Index::create()
                    .name("idx_messages_account_uid")
                    .table(Messages::Table)
                    .col(Messages::AccountId)
                    .col(Messages::Uid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // message_files table
        manager
            .create_table(
                Table::create()
                    .table(MessageFiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MessageFiles::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MessageFiles::MessageId).uuid().not_null())
                    .col(ColumnDef::new(MessageFiles::Filename).text().not_null())
                    .col(
                        ColumnDef::new(MessageFiles::ContentType)
                            .string_len(255)
                            .not_null()
                            .default("application/octet-stream"),
                    )
                    .col(
                        ColumnDef::new(MessageFiles::BlobRef)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MessageFiles::Size).big_integer().not_null())
                    .col(
                        ColumnDef::new(MessageFiles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MessageFiles::Table, MessageFiles::MessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_message_files_message")
                    .table(MessageFiles::Table)
                    .col(MessageFiles::MessageId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MessageFiles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Messages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MailAccounts::Table).to_owned())
            .await?;
        Ok(())
    }
}

// ========== Table identifiers ==========

#[derive(Iden)]
enum MailAccounts {
    Table,
    Id,
    Provider,
    Address,
    PasswordEncrypted,
    CreatedAt,
}

#[derive(Iden)]
enum Messages {
    Table,
    Id,
    AccountId,
    Uid,
    EmailFrom,
    Title,
    DispatchDate,
    ReceiptDate,
    Text,
    MsgRead,
    Files,
    CreatedAt,
}

#[derive(Iden)]
enum MessageFiles {
    Table,
    Id,
    MessageId,
    Filename,
    ContentType,
    BlobRef,
    Size,
    CreatedAt,
}
