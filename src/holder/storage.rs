use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::sd_jwt::SdJwt;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("credential `{0}` not found")]
    NotFound(String),
    #[error("credential `{0}` already exists")]
    AlreadyExists(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// A credential held by the wallet: received, still awaited, or refused by
/// its issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// The credential identifier assigned by the issuer.
    pub id: String,
    pub issuer: String,
    pub credential_type: String,
    #[serde(flatten)]
    pub state: CredentialState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CredentialState {
    Issued {
        /// The issuance in its `~`-delimited wire form.
        raw: String,
        received_at: u64,
    },
    Deferred {
        transaction_id: String,
        access_token: String,
        last_request: u64,
    },
    /// The issuer refused the request. Terminal: never polled again.
    Denied { denied_at: u64 },
}

impl StoredCredential {
    pub fn issued(
        id: impl Into<String>,
        issuer: impl Into<String>,
        credential_type: impl Into<String>,
        raw: impl Into<String>,
        received_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            issuer: issuer.into(),
            credential_type: credential_type.into(),
            state: CredentialState::Issued {
                raw: raw.into(),
                received_at,
            },
        }
    }

    pub fn deferred(
        id: impl Into<String>,
        issuer: impl Into<String>,
        credential_type: impl Into<String>,
        transaction_id: impl Into<String>,
        access_token: impl Into<String>,
        last_request: u64,
    ) -> Self {
        Self {
            id: id.into(),
            issuer: issuer.into(),
            credential_type: credential_type.into(),
            state: CredentialState::Deferred {
                transaction_id: transaction_id.into(),
                access_token: access_token.into(),
                last_request,
            },
        }
    }

    pub fn is_issued(&self) -> bool {
        matches!(self.state, CredentialState::Issued { .. })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.state, CredentialState::Deferred { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self.state, CredentialState::Denied { .. })
    }

    /// Parses the stored issuance, `None` unless the credential was issued.
    pub fn sd_jwt(&self) -> Option<Result<SdJwt, crate::core::sd_jwt::CryptoError>> {
        match &self.state {
            CredentialState::Issued { raw, .. } => Some(SdJwt::parse_issued(raw)),
            CredentialState::Deferred { .. } | CredentialState::Denied { .. } => None,
        }
    }
}

/// Storage interface for the wallet's credentials, keyed by credential id.
#[async_trait]
pub trait StorageProvider: Debug + Send + Sync {
    async fn get(&self, id: &str) -> Result<StoredCredential, StorageError>;

    /// Stores a new credential, failing if its id is already taken.
    async fn add(&self, credential: StoredCredential) -> Result<(), StorageError>;

    /// Stores every credential or none of them.
    async fn add_many(&self, credentials: Vec<StoredCredential>) -> Result<(), StorageError>;

    /// Replaces an existing credential.
    async fn update(&self, credential: StoredCredential) -> Result<(), StorageError>;

    async fn upsert(&self, credential: StoredCredential) -> Result<(), StorageError>;

    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    async fn all(&self) -> Result<Vec<StoredCredential>, StorageError>;

    async fn get_received(&self) -> Result<Vec<StoredCredential>, StorageError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(StoredCredential::is_issued)
            .collect())
    }

    async fn get_deferred(&self) -> Result<Vec<StoredCredential>, StorageError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(StoredCredential::is_deferred)
            .collect())
    }
}

/// A local in-memory store. Not for production use!
///
/// # Warning
/// Nothing is persisted or encrypted; credentials are lost when the store is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    store: Arc<Mutex<BTreeMap<String, StoredCredential>>>,
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn get(&self, id: &str) -> Result<StoredCredential, StorageError> {
        self.store
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_owned()))
    }

    async fn add(&self, credential: StoredCredential) -> Result<(), StorageError> {
        self.add_many(vec![credential]).await
    }

    async fn add_many(&self, credentials: Vec<StoredCredential>) -> Result<(), StorageError> {
        let mut store = self.store.lock().await;
        {
            let mut ids = BTreeSet::new();
            for credential in &credentials {
                if store.contains_key(&credential.id) || !ids.insert(credential.id.as_str()) {
                    return Err(StorageError::AlreadyExists(credential.id.clone()));
                }
            }
        }
        for credential in credentials {
            store.insert(credential.id.clone(), credential);
        }
        Ok(())
    }

    async fn update(&self, credential: StoredCredential) -> Result<(), StorageError> {
        match self.store.lock().await.get_mut(&credential.id) {
            Some(stored) => {
                *stored = credential;
                Ok(())
            }
            None => Err(StorageError::NotFound(credential.id)),
        }
    }

    async fn upsert(&self, credential: StoredCredential) -> Result<(), StorageError> {
        self.store
            .lock()
            .await
            .insert(credential.id.clone(), credential);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        if self.store.lock().await.remove(id).is_some() {
            return Ok(());
        }
        Err(StorageError::NotFound(id.to_owned()))
    }

    async fn all(&self) -> Result<Vec<StoredCredential>, StorageError> {
        Ok(self.store.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(id: &str) -> StoredCredential {
        StoredCredential::issued(id, "https://issuer.example/", "Identity", "h.p.s~", 10)
    }

    #[tokio::test]
    async fn add_many_is_atomic() {
        let storage = MemoryStorage::default();
        storage.add(issued("a")).await.unwrap();

        let err = storage
            .add_many(vec![issued("b"), issued("a")])
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::AlreadyExists("a".into()));
        assert_eq!(
            storage.get("b").await,
            Err(StorageError::NotFound("b".into()))
        );
        assert_eq!(storage.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn received_and_deferred_listings() {
        let storage = MemoryStorage::default();
        storage
            .add_many(vec![
                issued("a"),
                StoredCredential::deferred("b", "https://issuer.example/", "Identity", "tx", "at", 5),
            ])
            .await
            .unwrap();

        let received = storage.get_received().await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id, "a");
        let deferred = storage.get_deferred().await.unwrap();
        assert_eq!(deferred[0].id, "b");

        storage.update(issued("b")).await.unwrap();
        assert!(storage.get_deferred().await.unwrap().is_empty());
        storage.delete("a").await.unwrap();
        assert!(storage.delete("a").await.is_err());
        assert!(storage.update(issued("a")).await.is_err());
        storage.upsert(issued("a")).await.unwrap();
        assert_eq!(storage.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn denied_credentials_are_neither_received_nor_deferred() {
        let storage = MemoryStorage::default();
        let mut denied =
            StoredCredential::deferred("a", "https://issuer.example/", "Identity", "tx", "at", 5);
        denied.state = CredentialState::Denied { denied_at: 9 };
        storage.add(denied.clone()).await.unwrap();

        assert!(storage.get_received().await.unwrap().is_empty());
        assert!(storage.get_deferred().await.unwrap().is_empty());
        assert!(denied.is_denied());
        assert!(denied.sd_jwt().is_none());
        assert_eq!(serde_json::to_value(&denied).unwrap()["status"], "denied");
    }

    #[test]
    fn stored_credential_serialization() {
        let value = serde_json::to_value(issued("a")).unwrap();
        assert_eq!(value["status"], "issued");
        assert_eq!(value["raw"], "h.p.s~");
        let back: StoredCredential = serde_json::from_value(value).unwrap();
        assert_eq!(back, issued("a"));
    }
}
