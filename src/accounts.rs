use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use uuid::Uuid;

use crate::db::entities::mail_account;
use crate::error::{AccountError, ConnectError};
use crate::mail::provider::Provider;

/// A mailbox the pipeline may sync. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailAccount {
    pub id: Uuid,
    /// Provider name as stored; resolved to an endpoint at connect time
    pub provider: String,
    pub address: String,
    #[serde(skip)]
    pub password_encrypted: String,
}

impl From<mail_account::Model> for MailAccount {
    fn from(model: mail_account::Model) -> Self {
        Self {
            id: model.id,
            provider: model.provider,
            address: model.address,
            password_encrypted: model.password_encrypted,
        }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<MailAccount, AccountError>;
}

/// Turns an account's stored credential handle into the plaintext login secret.
pub trait CredentialVault: Send + Sync {
    fn reveal(&self, account: &MailAccount) -> Result<String, ConnectError>;
}

/// Vault for deployments that store app passwords as-is.
pub struct PassthroughVault;

impl CredentialVault for PassthroughVault {
    fn reveal(&self, account: &MailAccount) -> Result<String, ConnectError> {
        if account.password_encrypted.is_empty() {
            return Err(ConnectError::Credentials(format!(
                "no password stored for {}",
                account.address
            )));
        }
        Ok(account.password_encrypted.clone())
    }
}

/// SeaORM-backed account store over `mail_accounts`.
pub struct DbAccountStore {
    db: DatabaseConnection,
}

impl DbAccountStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Register a new mailbox. Addresses are unique.
    pub async fn register(
        &self,
        provider: Provider,
        address: &str,
        password: &str,
    ) -> Result<MailAccount, AccountError> {
        let address = address.trim();
        match address.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(AccountError::InvalidAddress(address.to_string())),
        }

        let existing = mail_account::Entity::find()
            .filter(mail_account::Column::Address.eq(address))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AccountError::AlreadyRegistered(address.to_string()));
        }

        let account = mail_account::ActiveModel {
            id: Set(Uuid::new_v4()),
            provider: Set(provider.as_str().to_string()),
            address: Set(address.to_string()),
            password_encrypted: Set(password.to_string()),
            created_at: Set(Utc::now()),
        };

        let model = account.insert(&self.db).await?;
        tracing::info!("Mail account '{}' registered ({})", model.address, model.provider);
        Ok(model.into())
    }
}

#[async_trait]
impl AccountStore for DbAccountStore {
    async fn get(&self, id: Uuid) -> Result<MailAccount, AccountError> {
        mail_account::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(MailAccount::from)
            .ok_or(AccountError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_db;

    #[tokio::test]
    async fn test_register_and_get() {
        let store = DbAccountStore::new(test_db().await);
        let account = store
            .register(Provider::Gmail, "user@gmail.com", "app-password")
            .await
            .unwrap();
        assert_eq!(account.provider, "GMAIL");

        let fetched = store.get(account.id).await.unwrap();
        assert_eq!(fetched, account);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_address() {
        let store = DbAccountStore::new(test_db().await);
        let err = store
            .register(Provider::Yandex, "not-an-address", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let store = DbAccountStore::new(test_db().await);
        store
            .register(Provider::MailRu, "user@mail.ru", "pw")
            .await
            .unwrap();
        let err = store
            .register(Provider::MailRu, "user@mail.ru", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_missing_account() {
        let store = DbAccountStore::new(test_db().await);
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id).await, Err(AccountError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn test_passthrough_vault_requires_password() {
        let mut account = crate::testing::account("GMAIL");
        assert_eq!(PassthroughVault.reveal(&account).unwrap(), "secret");

        account.password_encrypted.clear();
        assert!(matches!(
            PassthroughVault.reveal(&account),
            Err(ConnectError::Credentials(_))
        ));
    }
}
