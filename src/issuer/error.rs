use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Expected failures of the issuance flow, each carrying its OAuth 2.0 /
/// OID4VCI error code. Mapping to transport status codes is left to the
/// caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid client: {0}")]
    InvalidClient(String),
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    #[error("unsupported grant type `{0}`")]
    UnsupportedGrantType(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("invalid transaction id")]
    InvalidTransactionId,
    #[error("invalid credential request: {0}")]
    InvalidCredentialRequest(String),
    #[error("credential request denied")]
    CredentialRequestDenied,
    #[error("credential issuance is still pending")]
    IssuancePending,
    /// Failure of the issuer itself rather than of the request.
    #[error("server error: {0}")]
    ServerError(String),
}

/// Error body as returned by OAuth 2.0 endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidToken(_) => "invalid_token",
            Self::InvalidTransactionId => "invalid_transaction_id",
            Self::InvalidCredentialRequest(_) => "invalid_credential_request",
            Self::CredentialRequestDenied => "credential_request_denied",
            Self::IssuancePending => "issuance_pending",
            Self::ServerError(_) => "server_error",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let description = match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnsupportedGrantType(d)
            | Self::InvalidToken(d)
            | Self::InvalidCredentialRequest(d) => Some(d.clone()),
            Self::InvalidTransactionId
            | Self::CredentialRequestDenied
            | Self::IssuancePending
            | Self::ServerError(_) => None,
        };
        ErrorResponse {
            error: self.code().to_owned(),
            error_description: description,
        }
    }
}
