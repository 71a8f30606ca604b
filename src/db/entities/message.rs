use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub account_id: Uuid,
    pub uid: String,
    #[sea_orm(nullable)]
    pub email_from: Option<String>,
    #[sea_orm(nullable)]
    pub title: Option<String>,
    pub dispatch_date: chrono::DateTime<chrono::Utc>,
    pub receipt_date: chrono::DateTime<chrono::Utc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub text: Option<String>,
    pub msg_read: bool,
    /// Attachment metadata list, `[{"filename": ...}]`
    #[sea_orm(column_type = "Json", nullable)]
    pub files: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::mail_account::Entity",
        from = "Column::AccountId",
        to = "super::mail_account::Column::Id"
    )]
    MailAccount,
    #[sea_orm(has_many = "super::message_file::Entity")]
    Files,
}

impl Related<super::mail_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MailAccount.def()
    }
}

impl Related<super::message_file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Files.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
