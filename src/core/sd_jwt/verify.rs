use std::collections::{HashMap, HashSet};

use p256::{ecdsa::VerifyingKey, PublicKey};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use super::{
    is_registered_claim, jws, CryptoError, SdJwt, KB_JWT_TYP, SD_ALG_CLAIM, SD_CLAIM,
};
use crate::utils::now_secs;

/// Resolves the key that must have signed a credential.
pub trait KeyResolver {
    /// `issuer` is the unverified `iss` claim, `header` the unverified JWS header.
    fn resolve(
        &self,
        issuer: Option<&str>,
        header: &Map<String, Json>,
    ) -> Result<VerifyingKey, CryptoError>;
}

/// A single key trusted regardless of the claimed issuer.
impl KeyResolver for VerifyingKey {
    fn resolve(&self, _: Option<&str>, _: &Map<String, Json>) -> Result<VerifyingKey, CryptoError> {
        Ok(self.clone())
    }
}

/// A lookup function; `None` means the issuer is not trusted.
impl<F> KeyResolver for F
where
    F: Fn(Option<&str>, &Map<String, Json>) -> Option<VerifyingKey>,
{
    fn resolve(
        &self,
        issuer: Option<&str>,
        header: &Map<String, Json>,
    ) -> Result<VerifyingKey, CryptoError> {
        self(issuer, header)
            .ok_or_else(|| CryptoError::UnknownIssuer(issuer.unwrap_or_default().to_owned()))
    }
}

/// Keys of known issuers, looked up by the `iss` claim.
#[derive(Debug, Clone, Default)]
pub struct TrustedIssuers(HashMap<String, VerifyingKey>);

impl TrustedIssuers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>, key: VerifyingKey) -> Self {
        self.insert(issuer, key);
        self
    }

    pub fn insert(&mut self, issuer: impl Into<String>, key: VerifyingKey) {
        self.0.insert(issuer.into(), key);
    }
}

impl KeyResolver for TrustedIssuers {
    fn resolve(
        &self,
        issuer: Option<&str>,
        _: &Map<String, Json>,
    ) -> Result<VerifyingKey, CryptoError> {
        let issuer = issuer.ok_or_else(|| CryptoError::UnknownIssuer(String::new()))?;
        self.0
            .get(issuer)
            .cloned()
            .ok_or_else(|| CryptoError::UnknownIssuer(issuer.to_owned()))
    }
}

/// Expectations a verifier places on a presentation.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub expected_audience: Option<String>,
    pub expected_nonce: Option<String>,
    /// Reject presentations that carry no key binding JWT.
    pub require_key_binding: bool,
    /// Tolerated clock skew for `exp` and key binding `iat`, in seconds.
    pub leeway_secs: u64,
    /// Verification time; defaults to now.
    pub now: Option<u64>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            expected_audience: None,
            expected_nonce: None,
            require_key_binding: false,
            leeway_secs: 300,
            now: None,
        }
    }
}

/// Verifies an SD-JWT presentation and returns the merged claim set.
///
/// The returned map holds the signed payload minus the `_sd` and `_sd_alg`
/// bookkeeping claims, plus one entry per disclosure.
pub fn verify<R: KeyResolver + ?Sized>(
    presentation: &str,
    resolver: &R,
    options: &VerifyOptions,
) -> Result<Map<String, Json>, CryptoError> {
    let sd_jwt = SdJwt::parse(presentation)?;
    let (header, unverified) = jws::decode_unverified(sd_jwt.jwt())?;
    let key = resolver.resolve(unverified.get("iss").and_then(Json::as_str), &header)?;
    let (_, payload) = jws::verify_es256(sd_jwt.jwt(), &key)?;

    let now = options.now.unwrap_or_else(now_secs);
    if let Some(exp) = payload.get("exp") {
        let exp = exp
            .as_u64()
            .ok_or_else(|| CryptoError::Malformed("`exp` must be a number".into()))?;
        if exp.saturating_add(options.leeway_secs) < now {
            return Err(CryptoError::Expired);
        }
    }

    let alg = SdJwt::digest_algorithm(&payload)?;
    let committed: HashSet<&str> = match payload.get(SD_CLAIM) {
        None => HashSet::new(),
        Some(Json::Array(digests)) => digests.iter().filter_map(Json::as_str).collect(),
        Some(_) => return Err(CryptoError::Malformed("`_sd` must be an array".into())),
    };

    let mut claims = payload.clone();
    claims.remove(SD_CLAIM);
    claims.remove(SD_ALG_CLAIM);

    let mut seen = HashSet::new();
    for disclosure in sd_jwt.disclosures() {
        let digest = disclosure.digest(alg);
        if !seen.insert(digest.clone()) {
            return Err(CryptoError::DuplicateDisclosure(disclosure.encoded().to_owned()));
        }
        if !committed.contains(digest.as_str()) {
            warn!(%digest, "presented disclosure is not committed to by the issuer");
            return Err(CryptoError::DigestMismatch(digest));
        }
        let name = disclosure.claim_name();
        if is_registered_claim(name) {
            return Err(CryptoError::RegisteredClaimDisclosed(name.to_owned()));
        }
        if claims.contains_key(name) {
            return Err(CryptoError::ClaimShadowed(name.to_owned()));
        }
        claims.insert(name.to_owned(), disclosure.claim_value().clone());
    }

    match sd_jwt.key_binding() {
        Some(kb_jwt) => verify_key_binding(&sd_jwt, kb_jwt, &payload, options, now)?,
        None if options.require_key_binding => {
            return Err(CryptoError::KeyBindingInvalid(
                "presentation carries no key binding JWT".into(),
            ))
        }
        None => {}
    }

    debug!(
        disclosed = sd_jwt.disclosures().len(),
        key_bound = sd_jwt.key_binding().is_some(),
        "verified SD-JWT presentation"
    );
    Ok(claims)
}

fn verify_key_binding(
    sd_jwt: &SdJwt,
    kb_jwt: &str,
    payload: &Map<String, Json>,
    options: &VerifyOptions,
    now: u64,
) -> Result<(), CryptoError> {
    let invalid = |reason: &str| CryptoError::KeyBindingInvalid(reason.to_owned());

    let jwk = payload
        .get("cnf")
        .and_then(|cnf| cnf.get("jwk"))
        .ok_or_else(|| invalid("credential has no `cnf.jwk` holder key"))?;
    let holder_key = PublicKey::from_jwk_str(&jwk.to_string())
        .map_err(|_| invalid("`cnf.jwk` is not a P-256 key"))?;

    let (header, kb) = jws::verify_es256(kb_jwt, &VerifyingKey::from(holder_key))
        .map_err(|e| CryptoError::KeyBindingInvalid(e.to_string()))?;
    if header.get("typ").and_then(Json::as_str) != Some(KB_JWT_TYP) {
        return Err(invalid("unexpected `typ` header"));
    }

    let alg = SdJwt::digest_algorithm(payload)?;
    if kb.get("sd_hash").and_then(Json::as_str) != Some(alg.digest(&sd_jwt.serialize_unbound()).as_str()) {
        return Err(invalid("`sd_hash` does not match the presentation"));
    }
    if let Some(aud) = &options.expected_audience {
        if kb.get("aud").and_then(Json::as_str) != Some(aud.as_str()) {
            return Err(invalid("audience mismatch"));
        }
    }
    if let Some(nonce) = &options.expected_nonce {
        if kb.get("nonce").and_then(Json::as_str) != Some(nonce.as_str()) {
            return Err(invalid("nonce mismatch"));
        }
    }
    let iat = kb
        .get("iat")
        .and_then(Json::as_u64)
        .ok_or_else(|| invalid("missing `iat`"))?;
    if iat > now.saturating_add(options.leeway_secs)
        || iat.saturating_add(options.leeway_secs) < now
    {
        return Err(invalid("`iat` is outside the accepted window"));
    }
    Ok(())
}
