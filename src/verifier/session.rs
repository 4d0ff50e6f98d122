use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{VerificationError, VerifiedPresentation};
use crate::core::authorization_request::AuthorizationRequestObject;

#[derive(Debug, Clone)]
pub struct Session {
    pub uuid: Uuid,
    pub status: Status,
    /// Name the presentation definition was registered under.
    pub definition_reference: String,
    pub authorization_request_object: AuthorizationRequestObject,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Status {
    /// Wallet has been sent the request, waiting on the wallet to process the request.
    SentRequest,
    /// Verifier has received the response and is now processing it.
    ReceivedResponse,
    /// Verifier has finished processing the response.
    Complete(Outcome),
}

#[derive(Debug, Clone)]
pub enum Outcome {
    /// The authorization response did not pass verification.
    Failure { reason: VerificationError },
    /// The authorization response is verified.
    Success {
        presentations: Vec<VerifiedPresentation>,
    },
}

/// Storage interface for session information.
#[async_trait]
pub trait SessionStore: Debug {
    /// Store a new authorization request session.
    async fn initiate(&self, session: Session) -> Result<()>;

    /// Update the status of a session.
    async fn update_status(&self, uuid: Uuid, status: Status) -> Result<()>;

    /// Moves a session from [Status::SentRequest] to [Status::ReceivedResponse]
    /// and returns it. Fails for any other status, so each request is
    /// answered at most once.
    async fn receive_response(&self, uuid: Uuid) -> Result<Session>;

    /// Get a session from the store.
    async fn get_session(&self, uuid: Uuid) -> Result<Session>;

    /// Remove a session from the store.
    async fn remove_session(&self, uuid: Uuid) -> Result<()>;
}

/// A local in-memory store. Not for production use!
///
/// # Warning
/// This in-memory store should only be used for test purposes, it will not work for a distributed
/// deployment.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    store: Arc<Mutex<BTreeMap<Uuid, Session>>>,
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn initiate(&self, session: Session) -> Result<()> {
        let mut store = self.store.lock().await;
        if store.contains_key(&session.uuid) {
            bail!("session already exists")
        }
        store.insert(session.uuid, session);

        Ok(())
    }

    async fn update_status(&self, uuid: Uuid, status: Status) -> Result<()> {
        if let Some(session) = self.store.lock().await.get_mut(&uuid) {
            session.status = status;
            return Ok(());
        }
        bail!("session not found")
    }

    async fn receive_response(&self, uuid: Uuid) -> Result<Session> {
        let mut store = self.store.lock().await;
        let Some(session) = store.get_mut(&uuid) else {
            bail!("session not found")
        };
        if session.status != Status::SentRequest {
            bail!("session already received a response")
        }
        session.status = Status::ReceivedResponse;
        Ok(session.clone())
    }

    async fn get_session(&self, uuid: Uuid) -> Result<Session> {
        if let Some(session) = self.store.lock().await.get(&uuid) {
            return Ok(session.clone());
        }

        bail!("session not found")
    }

    async fn remove_session(&self, uuid: Uuid) -> Result<()> {
        if self.store.lock().await.remove(&uuid).is_some() {
            return Ok(());
        }

        bail!("session not found")
    }
}

impl PartialEq for Outcome {
    fn eq(&self, other: &Self) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }
}

impl Outcome {
    fn ordering(&self) -> u8 {
        match self {
            Outcome::Failure { .. } => 0,
            Outcome::Success { .. } => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl PartialOrd for Outcome {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.ordering().partial_cmp(&other.ordering())
    }
}
