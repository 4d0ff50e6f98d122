//! Holder (wallet) role: acquiring credentials from issuers, keeping them in
//! a [StorageProvider], and answering verifiers' presentation requests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use p256::{
    ecdsa::{SigningKey, VerifyingKey},
    PublicKey,
};
use tracing::{debug, info, warn};

use crate::{
    core::{
        authorization_request::AuthorizationRequestObject,
        presentation_definition::PresentationDefinition,
        response::AuthorizationResponse,
        sd_jwt::{verify, KeyBinding, SdJwt, VerifyOptions},
    },
    issuer::{CredentialResponse, ProtocolError, TokenResponse},
    utils::now_secs,
};

pub mod matcher;
pub mod selection;
pub mod storage;

pub use matcher::{match_definition, DescriptorMatch, MatchError, MatchedPresentation};
pub use selection::{FieldRequest, FieldSelection};
pub use storage::{CredentialState, MemoryStorage, StorageError, StorageProvider, StoredCredential};

/// Transport to one issuer's credential and deferred credential endpoints.
#[async_trait]
pub trait IssuerClient: Sync {
    /// Issuer identifier, the `iss` of its credentials.
    fn issuer(&self) -> &str;

    /// Key to check received credentials against, when known.
    fn issuer_key(&self) -> Option<VerifyingKey> {
        None
    }

    async fn request_credential(
        &self,
        access_token: &str,
        credential_identifier: &str,
        holder_key: Option<&PublicKey>,
    ) -> Result<CredentialResponse>;

    /// Polls a deferred credential. A still pending request is reported as
    /// [CredentialResponse::Deferred].
    async fn deferred_credential(
        &self,
        access_token: &str,
        transaction_id: &str,
    ) -> Result<CredentialResponse>;
}

/// Deferred credentials resolved by [Holder::refresh_all_deferred].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredRefresh {
    pub issued: Vec<StoredCredential>,
    pub denied: Vec<StoredCredential>,
}

#[derive(Debug)]
pub struct Holder<S> {
    storage: S,
    key: SigningKey,
}

impl<S: StorageProvider> Holder<S> {
    pub fn new(storage: S, key: SigningKey) -> Self {
        Self { storage, key }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The key credentials are bound to.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.key.verifying_key())
    }

    /// Requests every credential granted by `token`.
    ///
    /// Nothing is stored unless every request succeeds.
    pub async fn acquire_credentials<C: IssuerClient + ?Sized>(
        &self,
        client: &C,
        token: &TokenResponse,
    ) -> Result<Vec<StoredCredential>> {
        let holder_key = self.public_key();
        let mut batch = Vec::new();
        for details in &token.authorization_details {
            for credential_identifier in &details.credential_identifiers {
                let response = client
                    .request_credential(&token.access_token, credential_identifier, Some(&holder_key))
                    .await
                    .with_context(|| format!("credential request for `{credential_identifier}` failed"))?;
                let now = now_secs();
                let stored = match response {
                    CredentialResponse::Issued { credential } => {
                        self.check_issued(client, &credential)
                            .with_context(|| format!("received invalid credential `{credential_identifier}`"))?;
                        StoredCredential::issued(
                            credential_identifier.as_str(),
                            client.issuer(),
                            details.credential_configuration_id.as_str(),
                            credential,
                            now,
                        )
                    }
                    CredentialResponse::Deferred { transaction_id } => StoredCredential::deferred(
                        credential_identifier.as_str(),
                        client.issuer(),
                        details.credential_configuration_id.as_str(),
                        transaction_id,
                        token.access_token.as_str(),
                        now,
                    ),
                };
                batch.push(stored);
            }
        }

        self.storage
            .add_many(batch.clone())
            .await
            .context("failed to store credentials")?;
        info!(count = batch.len(), issuer = client.issuer(), "Acquired credentials");
        Ok(batch)
    }

    /// Polls the issuer for a deferred credential, storing it once issued.
    ///
    /// A denial from the issuer is recorded as [CredentialState::Denied] and
    /// returned as an error wrapping [ProtocolError::CredentialRequestDenied];
    /// a denied credential is never polled again.
    pub async fn refresh_credential<C: IssuerClient + ?Sized>(
        &self,
        client: &C,
        id: &str,
    ) -> Result<StoredCredential> {
        let stored = self.storage.get(id).await?;
        let (transaction_id, access_token) = match &stored.state {
            CredentialState::Issued { .. } => return Ok(stored),
            CredentialState::Denied { .. } => {
                return Err(anyhow::Error::new(ProtocolError::CredentialRequestDenied)
                    .context(format!("credential `{id}` was denied by its issuer")))
            }
            CredentialState::Deferred {
                transaction_id,
                access_token,
                ..
            } => (transaction_id.clone(), access_token.clone()),
        };
        if stored.issuer != client.issuer() {
            bail!("credential `{id}` was not requested from {}", client.issuer());
        }

        let response = match client.deferred_credential(&access_token, &transaction_id).await {
            Ok(response) => response,
            Err(e) if is_denial(&e) => {
                warn!(id, "Credential request denied by issuer");
                let denied = StoredCredential {
                    state: CredentialState::Denied {
                        denied_at: now_secs(),
                    },
                    ..stored
                };
                self.storage.update(denied).await?;
                return Err(e.context(format!("credential `{id}` was denied by its issuer")));
            }
            Err(e) => {
                return Err(e.context(format!("deferred credential request for `{id}` failed")))
            }
        };
        let now = now_secs();
        let refreshed = match response {
            CredentialResponse::Issued { credential } => {
                self.check_issued(client, &credential)
                    .with_context(|| format!("received invalid credential `{id}`"))?;
                info!(id, "Deferred credential issued");
                StoredCredential {
                    state: CredentialState::Issued {
                        raw: credential,
                        received_at: now,
                    },
                    ..stored
                }
            }
            CredentialResponse::Deferred { .. } => {
                debug!(id, "Credential still pending");
                StoredCredential {
                    state: CredentialState::Deferred {
                        transaction_id,
                        access_token,
                        last_request: now,
                    },
                    ..stored
                }
            }
        };
        self.storage.update(refreshed.clone()).await?;
        Ok(refreshed)
    }

    /// Refreshes every deferred credential requested from `client`'s issuer,
    /// returning those that were issued or denied by this refresh.
    ///
    /// Other failures are logged and the credential stays deferred.
    pub async fn refresh_all_deferred<C: IssuerClient + ?Sized>(
        &self,
        client: &C,
    ) -> Result<DeferredRefresh> {
        let mut refresh = DeferredRefresh::default();
        for deferred in self.storage.get_deferred().await? {
            if deferred.issuer != client.issuer() {
                continue;
            }
            match self.refresh_credential(client, &deferred.id).await {
                Ok(refreshed) if refreshed.is_issued() => refresh.issued.push(refreshed),
                Ok(_) => {}
                Err(e) if is_denial(&e) => {
                    refresh.denied.push(self.storage.get(&deferred.id).await?)
                }
                Err(e) => warn!(id = deferred.id.as_str(), "Failed to refresh credential: {e:#}"),
            }
        }
        Ok(refresh)
    }

    /// The fields `definition` asks for, for the user to approve.
    pub fn requested_fields(&self, definition: &PresentationDefinition) -> Vec<FieldRequest> {
        FieldSelection::requested_fields(definition)
    }

    /// Answers a verifier's request with the fields the user approved.
    ///
    /// Candidate credentials are considered oldest first, so the earliest
    /// received credential wins a tie.
    pub async fn present(
        &self,
        request: &AuthorizationRequestObject,
        selection: &FieldSelection,
    ) -> Result<AuthorizationResponse> {
        request.validate()?;

        let mut received = self.storage.get_received().await?;
        received.sort_by(|a, b| match (&a.state, &b.state) {
            (
                CredentialState::Issued { received_at: x, .. },
                CredentialState::Issued { received_at: y, .. },
            ) => x.cmp(y).then_with(|| a.id.cmp(&b.id)),
            _ => a.id.cmp(&b.id),
        });
        let credentials: Vec<SdJwt> = received
            .iter()
            .filter_map(|stored| match stored.sd_jwt()? {
                Ok(sd_jwt) => Some(sd_jwt),
                Err(e) => {
                    warn!(id = stored.id.as_str(), "Skipping unreadable credential: {e}");
                    None
                }
            })
            .collect();

        let matched = match_definition(&request.presentation_definition, selection, &credentials)?;
        let key_binding = KeyBinding::new(&self.key, &request.client_id, &request.nonce.0);
        let (vp_token, submission) = matched.into_vp_token(Some(&key_binding))?;
        info!(
            definition = request.presentation_definition.id().as_str(),
            "Prepared presentation"
        );
        Ok(AuthorizationResponse::new(vp_token, submission).with_state(request.state.clone()))
    }

    fn check_issued<C: IssuerClient + ?Sized>(&self, client: &C, credential: &str) -> Result<()> {
        SdJwt::parse_issued(credential)?;
        if let Some(key) = client.issuer_key() {
            verify(credential, &key, &VerifyOptions::default())?;
        }
        Ok(())
    }
}

fn is_denial(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ProtocolError>() == Some(&ProtocolError::CredentialRequestDenied)
}
