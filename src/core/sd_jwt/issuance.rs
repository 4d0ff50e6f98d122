use p256::{ecdsa::SigningKey, PublicKey};
use serde_json::{Map, Value as Json};
use tracing::debug;

use super::{
    is_registered_claim, jws, CryptoError, DigestAlgorithm, Disclosure, SdJwt, SD_ALG_CLAIM,
    SD_CLAIM, SD_JWT_VC_TYP,
};

/// Issuer-side policy applied when constructing a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuancePolicy {
    /// Refuse to issue credentials that are not bound to a holder key.
    pub enforce_key_binding: bool,
    pub digest_algorithm: DigestAlgorithm,
    /// Optional `kid` header identifying the issuer key.
    pub key_id: Option<String>,
}

/// Builds and signs an SD-JWT VC.
///
/// Every entry of `disclosable` becomes a salted disclosure whose digest is
/// listed in `_sd`; `non_disclosable` claims are copied into the payload
/// as-is. When `holder_key` is present it is embedded as `cnf.jwk`.
pub fn construct(
    disclosable: &Map<String, Json>,
    non_disclosable: &Map<String, Json>,
    issuer_key: &SigningKey,
    holder_key: Option<&PublicKey>,
    policy: &IssuancePolicy,
) -> Result<SdJwt, CryptoError> {
    if policy.enforce_key_binding && holder_key.is_none() {
        return Err(CryptoError::MissingHolderKey);
    }

    let mut disclosures = Vec::with_capacity(disclosable.len());
    for (name, value) in disclosable {
        if is_registered_claim(name) {
            return Err(CryptoError::RegisteredClaimDisclosed(name.clone()));
        }
        if non_disclosable.contains_key(name) {
            return Err(CryptoError::ClaimShadowed(name.clone()));
        }
        disclosures.push(Disclosure::new(name.clone(), value.clone())?);
    }

    let mut digests: Vec<Json> = disclosures
        .iter()
        .map(|d| Json::String(d.digest(policy.digest_algorithm)))
        .collect();
    // Sorted so the digest order reveals nothing about claim order.
    digests.sort_by(|a, b| a.as_str().cmp(&b.as_str()));

    let mut payload = non_disclosable.clone();
    payload.insert(SD_CLAIM.into(), Json::Array(digests));
    payload.insert(
        SD_ALG_CLAIM.into(),
        policy.digest_algorithm.name().into(),
    );
    if let Some(holder_key) = holder_key {
        let jwk: Json = serde_json::from_str(&holder_key.to_jwk_string())
            .map_err(CryptoError::malformed)?;
        let mut cnf = Map::new();
        cnf.insert("jwk".into(), jwk);
        payload.insert("cnf".into(), Json::Object(cnf));
    }

    let mut header = Map::new();
    header.insert("typ".into(), SD_JWT_VC_TYP.into());
    if let Some(kid) = &policy.key_id {
        header.insert("kid".into(), kid.clone().into());
    }

    let jwt = jws::sign_es256(header, &payload, issuer_key)?;
    debug!(
        disclosures = disclosures.len(),
        bound = holder_key.is_some(),
        "constructed SD-JWT VC"
    );
    Ok(SdJwt::new(jwt, disclosures))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn claims(value: Json) -> Map<String, Json> {
        value.as_object().cloned().unwrap()
    }

    fn issuer_key() -> SigningKey {
        SigningKey::random(&mut rand::thread_rng())
    }

    #[test]
    fn every_disclosure_digest_is_committed() {
        for alg in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            let policy = IssuancePolicy {
                digest_algorithm: alg,
                ..Default::default()
            };
            let sd_jwt = construct(
                &claims(json!({"a": 1, "b": [true], "c": {"d": null}})),
                &claims(json!({"iss": "https://issuer.example"})),
                &issuer_key(),
                None,
                &policy,
            )
            .unwrap();

            let payload = sd_jwt.payload_unverified().unwrap();
            assert_eq!(payload[SD_ALG_CLAIM], alg.name());
            let committed: Vec<&str> = payload[SD_CLAIM]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(Json::as_str)
                .collect();
            assert_eq!(committed.len(), 3);
            for disclosure in sd_jwt.disclosures() {
                assert!(committed.contains(&disclosure.digest(alg).as_str()));
                assert!(!payload.contains_key(disclosure.claim_name()));
            }
        }
    }

    #[test]
    fn registered_claims_cannot_be_disclosable() {
        for name in ["iss", "nbf", "exp", "cnf", "vct", "status"] {
            let mut disclosable = Map::new();
            disclosable.insert(name.into(), json!("x"));
            assert_eq!(
                construct(
                    &disclosable,
                    &Map::new(),
                    &issuer_key(),
                    None,
                    &IssuancePolicy::default()
                ),
                Err(CryptoError::RegisteredClaimDisclosed(name.into()))
            );
        }
    }

    #[test]
    fn enforced_key_binding_requires_holder_key() {
        let policy = IssuancePolicy {
            enforce_key_binding: true,
            ..Default::default()
        };
        assert_eq!(
            construct(&Map::new(), &Map::new(), &issuer_key(), None, &policy),
            Err(CryptoError::MissingHolderKey)
        );

        let holder = SigningKey::random(&mut rand::thread_rng());
        let holder_key = PublicKey::from(holder.verifying_key());
        let sd_jwt = construct(
            &Map::new(),
            &Map::new(),
            &issuer_key(),
            Some(&holder_key),
            &policy,
        )
        .unwrap();
        let payload = sd_jwt.payload_unverified().unwrap();
        let jwk = payload["cnf"]["jwk"].to_string();
        assert_eq!(PublicKey::from_jwk_str(&jwk).unwrap(), holder_key);
    }

    #[test]
    fn header_carries_type_and_kid() {
        let policy = IssuancePolicy {
            key_id: Some("issuer-key-1".into()),
            ..Default::default()
        };
        let sd_jwt = construct(&Map::new(), &Map::new(), &issuer_key(), None, &policy).unwrap();
        let header = sd_jwt.decode().unwrap().header;
        assert_eq!(header["typ"], SD_JWT_VC_TYP);
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["kid"], "issuer-key-1");
    }

    #[test]
    fn overlapping_claim_rejected() {
        let both = claims(json!({"name": "Bob"}));
        assert_eq!(
            construct(&both, &both, &issuer_key(), None, &IssuancePolicy::default()),
            Err(CryptoError::ClaimShadowed("name".into()))
        );
    }
}
