use std::fmt;

use base64::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::CryptoError;

/// Number of random bytes in a freshly generated salt.
const SALT_LEN: usize = 16;

/// Hash function used to commit to disclosures, as named in the `_sd_alg` claim.
///
/// Names follow the [IANA Named Information Hash Algorithm Registry](https://www.iana.org/assignments/named-information/named-information.xhtml).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[default]
    #[serde(rename = "sha-256")]
    Sha256,
    #[serde(rename = "sha-384")]
    Sha384,
    #[serde(rename = "sha-512")]
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha-256",
            Self::Sha384 => "sha-384",
            Self::Sha512 => "sha-512",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name {
            "sha-256" => Ok(Self::Sha256),
            "sha-384" => Ok(Self::Sha384),
            "sha-512" => Ok(Self::Sha512),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_owned())),
        }
    }

    /// Hashes the ASCII bytes of `input` and returns the base64url (unpadded) digest.
    pub fn digest(&self, input: &str) -> String {
        let hash = match self {
            Self::Sha256 => Sha256::digest(input.as_bytes()).to_vec(),
            Self::Sha384 => Sha384::digest(input.as_bytes()).to_vec(),
            Self::Sha512 => Sha512::digest(input.as_bytes()).to_vec(),
        };
        BASE64_URL_SAFE_NO_PAD.encode(hash)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// A single selectively-disclosable claim: the `[salt, name, value]` triple
/// together with the exact encoding it was issued under.
///
/// The encoded form is kept verbatim since digests are computed over it,
/// and re-serializing the triple is not guaranteed to reproduce the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disclosure {
    salt: String,
    claim_name: String,
    claim_value: Json,
    encoded: String,
}

impl Disclosure {
    /// Creates a disclosure with a fresh random salt.
    pub fn new(claim_name: impl Into<String>, claim_value: Json) -> Result<Self, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(BASE64_URL_SAFE_NO_PAD.encode(salt), claim_name, claim_value)
    }

    pub fn with_salt(
        salt: impl Into<String>,
        claim_name: impl Into<String>,
        claim_value: Json,
    ) -> Result<Self, CryptoError> {
        let salt = salt.into();
        let claim_name = claim_name.into();
        let triple = Json::Array(vec![
            Json::String(salt.clone()),
            Json::String(claim_name.clone()),
            claim_value.clone(),
        ]);
        let encoded = serde_json::to_vec(&triple)
            .map(|b| BASE64_URL_SAFE_NO_PAD.encode(b))
            .map_err(CryptoError::malformed)?;
        Ok(Self {
            salt,
            claim_name,
            claim_value,
            encoded,
        })
    }

    /// Parses a base64url-encoded disclosure.
    pub fn parse(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| CryptoError::Malformed(format!("disclosure is not base64url: {e}")))?;
        let triple: Vec<Json> = serde_json::from_slice(&bytes)
            .map_err(|e| CryptoError::Malformed(format!("disclosure is not a JSON array: {e}")))?;
        let Ok([salt, claim_name, claim_value]) = <[Json; 3]>::try_from(triple) else {
            return Err(CryptoError::Malformed(
                "disclosure must have exactly three elements".into(),
            ));
        };
        let (Json::String(salt), Json::String(claim_name)) = (salt, claim_name) else {
            return Err(CryptoError::Malformed(
                "disclosure salt and claim name must be strings".into(),
            ));
        };
        Ok(Self {
            salt,
            claim_name,
            claim_value,
            encoded: encoded.to_owned(),
        })
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn claim_name(&self) -> &str {
        &self.claim_name
    }

    pub fn claim_value(&self) -> &Json {
        &self.claim_value
    }

    /// The encoded form, which also serves as the disclosure's identifier.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn digest(&self, alg: DigestAlgorithm) -> String {
        alg.digest(&self.encoded)
    }

    /// The disclosure as a single-entry `{claim_name: claim_value}` object.
    pub fn to_claim(&self) -> Map<String, Json> {
        let mut claim = Map::new();
        claim.insert(self.claim_name.clone(), self.claim_value.clone());
        claim
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn known_digest() {
        // Worked example from the SD-JWT draft.
        let disclosure =
            Disclosure::parse("WyI2cU1RdlJMNWhhaiIsICJmYW1pbHlfbmFtZSIsICJNw7ZiaXVzIl0").unwrap();
        assert_eq!(disclosure.salt(), "6qMQvRL5haj");
        assert_eq!(disclosure.claim_name(), "family_name");
        assert_eq!(disclosure.claim_value(), &json!("Möbius"));
        assert_eq!(
            disclosure.digest(DigestAlgorithm::Sha256),
            "uutlBuYeMDyjLLTpf6Jxi7yNkEF35jdyWMn9U7b_RYY"
        );
    }

    #[test]
    fn parse_keeps_original_encoding() {
        let disclosure = Disclosure::new("is_over_18", json!(true)).unwrap();
        let parsed = Disclosure::parse(disclosure.encoded()).unwrap();
        assert_eq!(parsed, disclosure);
        assert_eq!(parsed.to_claim(), json!({"is_over_18": true}).as_object().unwrap().clone());
    }

    #[test]
    fn fresh_salts_differ() {
        let a = Disclosure::new("name", json!("Bob")).unwrap();
        let b = Disclosure::new("name", json!("Bob")).unwrap();
        assert_ne!(a.salt(), b.salt());
        assert_ne!(
            a.digest(DigestAlgorithm::Sha256),
            b.digest(DigestAlgorithm::Sha256)
        );
    }

    #[test]
    fn rejects_wrong_shape() {
        let two = BASE64_URL_SAFE_NO_PAD.encode(br#"["salt", "name"]"#);
        assert!(matches!(
            Disclosure::parse(&two),
            Err(CryptoError::Malformed(_))
        ));
        let numeric_name = BASE64_URL_SAFE_NO_PAD.encode(br#"["salt", 1, "value"]"#);
        assert!(Disclosure::parse(&numeric_name).is_err());
        assert!(Disclosure::parse("not base64!").is_err());
    }

    #[test]
    fn digest_algorithm_names() {
        for alg in [
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            assert_eq!(DigestAlgorithm::from_name(alg.name()).unwrap(), alg);
        }
        assert_eq!(
            DigestAlgorithm::from_name("md5"),
            Err(CryptoError::UnsupportedAlgorithm("md5".into()))
        );
    }
}
