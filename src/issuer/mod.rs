//! Credential issuer role.
//!
//! A request moves through `REQUESTED -> PENDING -> ACCEPTED | DENIED`:
//!
//! 1. [CredentialIssuer::submit_request] validates the submitted information,
//!    opens a ticket and hands out a single-use authorization code.
//! 2. [CredentialIssuer::token] exchanges the code for an access token bound
//!    to the ticket's credential identifier.
//! 3. [CredentialIssuer::request_credential] issues the credential if the
//!    backend accepted the ticket, or returns a transaction id to poll
//!    [CredentialIssuer::deferred_credential] with while it is pending.
//!
//! Credentials are constructed on demand from the submitted information.

use std::{collections::HashMap, sync::Arc};

use p256::{
    ecdsa::{SigningKey, VerifyingKey},
    PublicKey,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, info, warn};

use crate::{
    config::IssuerConfig,
    core::sd_jwt::{construct, CryptoError, IssuancePolicy},
    utils::now_secs,
};

mod backend;
mod error;
mod options;
mod store;
pub mod token;

pub use backend::{IssuerBackend, TicketStatus, TimedBackend};
pub use error::{ErrorResponse, ProtocolError};
pub use options::{CredentialForm, CredentialOptions, FieldOption, ValueType};
pub use store::{IssuanceStore, Ticket};
use token::TokenSigner;

pub const AUTHORIZATION_CODE_GRANT: &str = "authorization_code";
const OPENID_CREDENTIAL: &str = "openid_credential";

/// Source of the current time in seconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Metadata a wallet registers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

fn default_grant_types() -> Vec<String> {
    vec![AUTHORIZATION_CODE_GRANT.to_owned()]
}

impl ClientMetadata {
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uris: vec![redirect_uri.into()],
            grant_types: default_grant_types(),
            client_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    pub client_secret: String,
    pub issuer_uri: String,
    #[serde(flatten)]
    pub metadata: ClientMetadata,
}

/// Answer to a submitted credential request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedRequest {
    pub ticket: u64,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub credential_configuration_id: String,
    pub credential_identifiers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub authorization_details: Vec<AuthorizationDetails>,
}

impl TokenResponse {
    /// The credential identifier the token was granted for.
    pub fn credential_identifier(&self) -> Option<&str> {
        self.authorization_details
            .iter()
            .flat_map(|details| &details.credential_identifiers)
            .map(String::as_str)
            .next()
    }
}

/// Status of a request as seen by a polling holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Accepted(String),
    Pending(String),
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialResponse {
    Issued { credential: String },
    Deferred { transaction_id: String },
}

pub struct CredentialIssuer<B = TimedBackend> {
    config: IssuerConfig,
    key: SigningKey,
    options: CredentialOptions,
    backend: B,
    store: IssuanceStore,
    tokens: TokenSigner,
    clients: HashMap<String, RegisteredClient>,
    clock: Clock,
}

impl<B: std::fmt::Debug> std::fmt::Debug for CredentialIssuer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("config", &self.config)
            .field("options", &self.options)
            .field("backend", &self.backend)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl CredentialIssuer<TimedBackend> {
    /// An issuer accepting requests once `config.pending_window_secs` elapsed.
    pub fn new(config: IssuerConfig, key: SigningKey, options: CredentialOptions) -> Self {
        let backend = TimedBackend::new(config.pending_window_secs);
        Self::with_backend(config, key, options, backend)
    }
}

impl<B: IssuerBackend> CredentialIssuer<B> {
    pub fn with_backend(
        config: IssuerConfig,
        key: SigningKey,
        options: CredentialOptions,
        backend: B,
    ) -> Self {
        Self {
            config,
            key,
            options,
            backend,
            store: IssuanceStore::new(),
            tokens: TokenSigner::random(),
            clients: HashMap::new(),
            clock: Arc::new(now_secs),
        }
    }

    pub fn with_token_signer(mut self, tokens: TokenSigner) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn issuer_uri(&self) -> &str {
        self.config.base.as_str()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key().clone()
    }

    pub fn credential_options(&self) -> &CredentialOptions {
        &self.options
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn register_client(&mut self, metadata: ClientMetadata) -> RegisteredClient {
        let client = RegisteredClient {
            client_id: uuid::Uuid::new_v4().to_string(),
            client_secret: uuid::Uuid::new_v4().to_string(),
            issuer_uri: self.issuer_uri().to_owned(),
            metadata,
        };
        info!(client_id = %client.client_id, "Registered client");
        self.clients.insert(client.client_id.clone(), client.clone());
        client
    }

    fn client(&self, client_id: &str) -> Result<&RegisteredClient, ProtocolError> {
        self.clients
            .get(client_id)
            .ok_or_else(|| ProtocolError::InvalidClient("client id not valid".into()))
    }

    /// Validates `information` against the form of `credential_type` and
    /// opens a ticket for it.
    pub fn submit_request(
        &mut self,
        client_id: &str,
        credential_type: &str,
        redirect_uri: &str,
        information: Map<String, Json>,
    ) -> Result<SubmittedRequest, ProtocolError> {
        let client = self.client(client_id)?;
        if !client.metadata.redirect_uris.iter().any(|uri| uri == redirect_uri) {
            return Err(ProtocolError::InvalidRequest(
                "redirect URI is not registered".into(),
            ));
        }
        self.options.check(credential_type, &information)?;

        let now = (self.clock)();
        let (ticket, code) =
            self.store
                .create(client_id, credential_type, redirect_uri, information, now)?;
        self.backend
            .create_ticket(ticket.number, credential_type, &ticket.information, now);
        info!(
            ticket = ticket.number,
            credential_type, "Credential request submitted"
        );
        Ok(SubmittedRequest {
            ticket: ticket.number,
            code,
        })
    }

    /// Exchanges an authorization code for an access token bound to the
    /// ticket's credential identifier.
    pub fn redeem_code(
        &mut self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, ProtocolError> {
        let client_secret = self.client(client_id)?.client_secret.clone();
        let ticket = self.store.redeem_code(code, client_id, redirect_uri)?;

        let lifetime = self.config.access_token_lifetime_secs;
        let access_token = self.tokens.mint(
            client_id,
            &client_secret,
            &ticket.credential_identifier,
            (self.clock)(),
            lifetime,
        )?;
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".into(),
            expires_in: lifetime,
            authorization_details: vec![AuthorizationDetails {
                type_: OPENID_CREDENTIAL.into(),
                credential_configuration_id: ticket.credential_type.clone(),
                credential_identifiers: vec![ticket.credential_identifier.clone()],
            }],
        })
    }

    /// Token endpoint: authenticates the client, then redeems the code.
    pub fn token(&mut self, request: &TokenRequest) -> Result<TokenResponse, ProtocolError> {
        if request.grant_type != AUTHORIZATION_CODE_GRANT {
            return Err(ProtocolError::UnsupportedGrantType(
                request.grant_type.clone(),
            ));
        }
        if self.client(&request.client_id)?.client_secret != request.client_secret {
            warn!(client_id = %request.client_id, "Client authentication failed");
            return Err(ProtocolError::InvalidClient(
                "client authentication failed".into(),
            ));
        }
        self.redeem_code(&request.code, &request.client_id, &request.redirect_uri)
    }

    /// Reports the status of a request, constructing its credential once
    /// accepted.
    ///
    /// The first query of a pending request opens a transaction; later
    /// queries return the same transaction id until the request resolves.
    pub fn query_status(
        &mut self,
        credential_identifier: &str,
    ) -> Result<CredentialStatus, ProtocolError> {
        let now = (self.clock)();
        let ticket = self.store.ticket(credential_identifier).ok_or_else(|| {
            ProtocolError::InvalidCredentialRequest("unknown credential identifier".into())
        })?;

        match self.backend.resolve_status(ticket.number, now) {
            TicketStatus::Pending => {
                let transaction_id = self
                    .store
                    .transaction_for(credential_identifier)
                    .ok_or_else(|| {
                        ProtocolError::ServerError("ticket vanished while pending".into())
                    })?;
                Ok(CredentialStatus::Pending(transaction_id))
            }
            TicketStatus::Accepted => {
                let credential = self.construct_credential(ticket, now)?;
                info!(ticket = ticket.number, "Credential issued");
                self.store.release_transaction(credential_identifier);
                Ok(CredentialStatus::Accepted(credential))
            }
            TicketStatus::Denied => {
                info!(ticket = ticket.number, "Credential request denied");
                self.store.release_transaction(credential_identifier);
                Ok(CredentialStatus::Denied)
            }
        }
    }

    /// Polls a deferred request by transaction id.
    pub fn query_deferred(
        &mut self,
        transaction_id: &str,
        credential_identifier: &str,
    ) -> Result<CredentialStatus, ProtocolError> {
        if self.store.transaction(transaction_id) != Some(credential_identifier) {
            debug!("Rejected unknown or mismatched transaction id");
            return Err(ProtocolError::InvalidTransactionId);
        }
        self.query_status(credential_identifier)
    }

    /// Credential endpoint.
    ///
    /// The access token must have been granted for `credential_identifier`.
    /// A supplied holder key is bound into the issued credential.
    pub fn request_credential(
        &mut self,
        access_token: &str,
        credential_identifier: &str,
        holder_key: Option<&PublicKey>,
    ) -> Result<CredentialResponse, ProtocolError> {
        let claims = self.authorize(access_token)?;
        if claims.credential_identifier != credential_identifier {
            return Err(ProtocolError::InvalidCredentialRequest(
                "credential identifier is not covered by the access token".into(),
            ));
        }
        let ticket = self.store.ticket_mut(credential_identifier).ok_or_else(|| {
            ProtocolError::InvalidCredentialRequest("unknown credential identifier".into())
        })?;
        match holder_key {
            Some(key) => ticket.holder_key = Some(key.clone()),
            None if self.config.enforce_key_binding && ticket.holder_key.is_none() => {
                return Err(ProtocolError::InvalidCredentialRequest(
                    "a holder key is required".into(),
                ));
            }
            None => {}
        }

        match self.query_status(credential_identifier)? {
            CredentialStatus::Accepted(credential) => Ok(CredentialResponse::Issued { credential }),
            CredentialStatus::Pending(transaction_id) => {
                Ok(CredentialResponse::Deferred { transaction_id })
            }
            CredentialStatus::Denied => Err(ProtocolError::CredentialRequestDenied),
        }
    }

    /// Deferred credential endpoint.
    pub fn deferred_credential(
        &mut self,
        access_token: &str,
        transaction_id: &str,
    ) -> Result<CredentialResponse, ProtocolError> {
        let claims = self.authorize(access_token)?;
        match self.query_deferred(transaction_id, &claims.credential_identifier)? {
            CredentialStatus::Accepted(credential) => Ok(CredentialResponse::Issued { credential }),
            CredentialStatus::Pending(_) => Err(ProtocolError::IssuancePending),
            CredentialStatus::Denied => Err(ProtocolError::CredentialRequestDenied),
        }
    }

    /// Rejects the request for `credential_identifier`.
    pub fn deny(&mut self, credential_identifier: &str) -> Result<(), ProtocolError> {
        let ticket = self.store.ticket(credential_identifier).ok_or_else(|| {
            ProtocolError::InvalidCredentialRequest("unknown credential identifier".into())
        })?;
        self.backend.deny(ticket.number);
        Ok(())
    }

    fn authorize(&self, access_token: &str) -> Result<token::AccessTokenClaims, ProtocolError> {
        self.tokens.verify(
            access_token,
            |client_id| {
                self.clients
                    .get(client_id)
                    .map(|client| client.client_secret.clone())
            },
            (self.clock)(),
        )
    }

    fn construct_credential(&self, ticket: &Ticket, now: u64) -> Result<String, ProtocolError> {
        let disclosable: Map<String, Json> = ticket
            .information
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let mut claims = Map::new();
        claims.insert("iss".into(), self.issuer_uri().into());
        claims.insert("iat".into(), now.into());
        claims.insert("vct".into(), ticket.credential_type.clone().into());
        if let Some(lifetime) = self.config.credential_lifetime_secs {
            claims.insert("exp".into(), now.saturating_add(lifetime).into());
        }

        let policy = IssuancePolicy {
            enforce_key_binding: self.config.enforce_key_binding,
            digest_algorithm: self.config.digest_algorithm,
            key_id: None,
        };
        construct(
            &disclosable,
            &claims,
            &self.key,
            ticket.holder_key.as_ref(),
            &policy,
        )
        .map(|sd_jwt| sd_jwt.serialize())
        .map_err(|e| match e {
            CryptoError::MissingHolderKey => {
                ProtocolError::InvalidCredentialRequest("a holder key is required".into())
            }
            e => ProtocolError::ServerError(e.to_string()),
        })
    }
}
