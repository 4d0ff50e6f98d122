//! Compact JWS helpers shared by credential, key binding and access tokens.

use base64::prelude::*;
use josekit::{
    jwk::Jwk,
    jws::{self, JwsHeader},
    JoseError,
};
use p256::{
    ecdsa::{SigningKey, VerifyingKey},
    PublicKey, SecretKey,
};
use serde_json::{Map, Value as Json};

use super::CryptoError;

pub const ES256: &str = "ES256";

pub type Claims = Map<String, Json>;

fn signing_jwk(key: &SigningKey) -> Result<Jwk, CryptoError> {
    let jwk = SecretKey::from(key).to_jwk_string();
    Jwk::from_bytes(jwk.as_bytes()).map_err(CryptoError::malformed)
}

fn verifying_jwk(key: &VerifyingKey) -> Result<Jwk, CryptoError> {
    let jwk = PublicKey::from(key).to_jwk_string();
    Jwk::from_bytes(jwk.as_bytes()).map_err(CryptoError::malformed)
}

/// Serializes `header` and `payload` as a compact JWS signed by `signer`,
/// which sets the `alg` header.
pub(crate) fn sign_compact(
    header: Claims,
    payload: &Claims,
    signer: &dyn jws::JwsSigner,
) -> Result<String, JoseError> {
    let header = JwsHeader::from_map(header)?;
    let payload = serde_json::to_vec(payload).map_err(|e| JoseError::InvalidJson(e.into()))?;
    jws::serialize_compact(&payload, &header, signer)
}

/// Checks a compact JWS with `verifier` and returns its header and payload.
pub(crate) fn verify_compact(
    jwt: &str,
    verifier: &dyn jws::JwsVerifier,
) -> Result<(Claims, Claims), JoseError> {
    let (payload, header) = jws::deserialize_compact(jwt, verifier)?;
    let payload = serde_json::from_slice(&payload).map_err(|e| JoseError::InvalidJson(e.into()))?;
    Ok((header.claims_set().clone(), payload))
}

/// Signs a compact JWS with ES256.
pub fn sign_es256(header: Claims, payload: &Claims, key: &SigningKey) -> Result<String, CryptoError> {
    let signer = jws::ES256
        .signer_from_jwk(&signing_jwk(key)?)
        .map_err(CryptoError::malformed)?;
    sign_compact(header, payload, &signer).map_err(CryptoError::malformed)
}

/// Decodes the header and payload of a compact JWS without checking its signature.
pub fn decode_unverified(jwt: &str) -> Result<(Claims, Claims), CryptoError> {
    let mut segments = jwt.split('.');
    let (Some(header), Some(payload), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(CryptoError::Malformed("JWS must have three segments".into()));
    };
    Ok((decode_segment(header)?, decode_segment(payload)?))
}

fn decode_segment(segment: &str) -> Result<Claims, CryptoError> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| CryptoError::Malformed(format!("JWS segment is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CryptoError::Malformed(format!("JWS segment is not a JSON object: {e}")))
}

/// Verifies an ES256 compact JWS and returns its header and payload.
pub fn verify_es256(jwt: &str, key: &VerifyingKey) -> Result<(Claims, Claims), CryptoError> {
    let (header, _) = decode_unverified(jwt)?;
    match header.get("alg").and_then(Json::as_str) {
        Some(ES256) => {}
        Some(other) => return Err(CryptoError::UnsupportedAlgorithm(other.to_owned())),
        None => return Err(CryptoError::Malformed("JWS header has no `alg`".into())),
    }
    let verifier = jws::ES256
        .verifier_from_jwk(&verifying_jwk(key)?)
        .map_err(CryptoError::malformed)?;
    verify_compact(jwt, &verifier).map_err(|e| match e {
        JoseError::InvalidJwsFormat(e) | JoseError::InvalidJson(e) => CryptoError::malformed(e),
        _ => CryptoError::SignatureInvalid,
    })
}
