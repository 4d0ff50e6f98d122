//! Access tokens bound to one credential identifier.
//!
//! Tokens are compact `HS256` JWS. The MAC key is derived per client as
//! HMAC-SHA256(issuer secret, client secret), so rotating either secret
//! invalidates every token issued with it.

use josekit::{
    jws::{JwsSigner, HS256},
    JoseError,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::debug;

use super::ProtocolError;
use crate::core::sd_jwt::jws;

const ACCESS_TOKEN_TYP: &str = "at+jwt";

fn server_error(e: JoseError) -> ProtocolError {
    ProtocolError::ServerError(e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// The client the token was issued to.
    pub sub: String,
    pub credential_identifier: String,
    pub iat: u64,
    pub exp: u64,
}

pub struct TokenSigner {
    issuer_secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(issuer_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            issuer_secret: issuer_secret.into(),
        }
    }

    /// A signer with a fresh 256-bit secret.
    pub fn random() -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret)
    }

    /// HMAC-SHA256(issuer secret, client secret).
    fn client_key(&self, client_secret: &str) -> Result<Vec<u8>, ProtocolError> {
        HS256
            .signer_from_bytes(&self.issuer_secret)
            .and_then(|derive| derive.sign(client_secret.as_bytes()))
            .map_err(server_error)
    }

    pub fn mint(
        &self,
        client_id: &str,
        client_secret: &str,
        credential_identifier: &str,
        now: u64,
        lifetime_secs: u64,
    ) -> Result<String, ProtocolError> {
        let claims = AccessTokenClaims {
            sub: client_id.to_owned(),
            credential_identifier: credential_identifier.to_owned(),
            iat: now,
            exp: now.saturating_add(lifetime_secs),
        };
        let Json::Object(payload) = serde_json::to_value(&claims)
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?
        else {
            return Err(ProtocolError::ServerError(
                "access token claims are not an object".into(),
            ));
        };
        let mut header = Map::new();
        header.insert("typ".into(), ACCESS_TOKEN_TYP.into());

        let signer = HS256
            .signer_from_bytes(self.client_key(client_secret)?)
            .map_err(server_error)?;
        jws::sign_compact(header, &payload, &signer).map_err(server_error)
    }

    /// Checks the token's MAC with the secret of the client named in `sub`,
    /// then its expiry.
    pub fn verify<F>(
        &self,
        token: &str,
        client_secret: F,
        now: u64,
    ) -> Result<AccessTokenClaims, ProtocolError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let invalid = |reason: &str| ProtocolError::InvalidToken(reason.to_owned());

        // The MAC key depends on the client, so `sub` is read before the MAC is checked.
        let (header, payload) =
            jws::decode_unverified(token).map_err(|_| invalid("malformed access token"))?;
        if header.get("alg").and_then(Json::as_str) != Some("HS256") {
            return Err(invalid("unsupported access token algorithm"));
        }
        let claims: AccessTokenClaims = serde_json::from_value(Json::Object(payload))
            .map_err(|_| invalid("malformed access token claims"))?;
        let secret = client_secret(&claims.sub).ok_or_else(|| invalid("unknown client"))?;

        let verifier = HS256
            .verifier_from_bytes(self.client_key(&secret)?)
            .map_err(server_error)?;
        jws::verify_compact(token, &verifier)
            .map_err(|_| invalid("access token signature mismatch"))?;

        if claims.exp <= now {
            debug!(client_id = %claims.sub, "Rejected expired access token");
            return Err(invalid("access token expired"));
        }
        Ok(claims)
    }
}
