//! Selective Disclosure JWTs as used by SD-JWT VCs.
//!
//! An SD-JWT travels as `<jwt>~<disclosure>~...~<disclosure>~[<kb-jwt>]`.
//! The issuer-signed JWT commits to every disclosure by listing its digest
//! in the `_sd` claim, so a holder may drop disclosures without invalidating
//! the signature. A presentation may end with a key binding JWT proving
//! possession of the key in the `cnf` claim.
//!
//! See [draft-ietf-oauth-selective-disclosure-jwt](https://datatracker.ietf.org/doc/draft-ietf-oauth-selective-disclosure-jwt/)
//! and [draft-ietf-oauth-sd-jwt-vc](https://datatracker.ietf.org/doc/draft-ietf-oauth-sd-jwt-vc/).

mod disclosure;
mod error;
mod issuance;
pub mod jws;
mod presentation;
mod verify;

pub use disclosure::{DigestAlgorithm, Disclosure};
pub use error::CryptoError;
pub use issuance::{construct, IssuancePolicy};
pub use presentation::{create_presentation, KeyBinding};
pub use verify::{verify, KeyResolver, TrustedIssuers, VerifyOptions};

use serde_json::{Map, Value as Json};

/// `typ` header of an issuer-signed SD-JWT VC.
pub const SD_JWT_VC_TYP: &str = "vc+sd-jwt";

/// `typ` header of a key binding JWT.
pub const KB_JWT_TYP: &str = "kb+jwt";

pub const SEPARATOR: char = '~';

/// Claims that must stay in the signed payload and can never be disclosures.
pub const REGISTERED_CLAIMS: [&str; 6] = ["iss", "nbf", "exp", "cnf", "vct", "status"];

pub(crate) const SD_CLAIM: &str = "_sd";
pub(crate) const SD_ALG_CLAIM: &str = "_sd_alg";

pub(crate) fn is_registered_claim(name: &str) -> bool {
    REGISTERED_CLAIMS.contains(&name) || name == SD_CLAIM || name == SD_ALG_CLAIM
}

/// A parsed SD-JWT: the issuer-signed JWT, its disclosures in order, and an
/// optional key binding JWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdJwt {
    jwt: String,
    disclosures: Vec<Disclosure>,
    key_binding: Option<String>,
}

impl SdJwt {
    pub(crate) fn new(jwt: String, disclosures: Vec<Disclosure>) -> Self {
        Self {
            jwt,
            disclosures,
            key_binding: None,
        }
    }

    /// Parses an issuance or presentation string.
    ///
    /// A bare JWT without any `~` is accepted as an SD-JWT with no disclosures.
    pub fn parse(input: &str) -> Result<Self, CryptoError> {
        let mut parts = input.split(SEPARATOR);
        let jwt = parts
            .next()
            .filter(|jwt| !jwt.is_empty())
            .ok_or_else(|| CryptoError::Malformed("missing issuer-signed JWT".into()))?;
        let mut rest: Vec<&str> = parts.collect();
        let key_binding = match rest.pop() {
            Some(last) if !last.is_empty() => Some(last.to_owned()),
            _ => None,
        };
        let disclosures = rest
            .into_iter()
            .map(|encoded| {
                if encoded.is_empty() {
                    return Err(CryptoError::Malformed("empty disclosure".into()));
                }
                Disclosure::parse(encoded)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            jwt: jwt.to_owned(),
            disclosures,
            key_binding,
        })
    }

    /// Parses a credential as received from an issuer, which must not be key bound.
    pub fn parse_issued(input: &str) -> Result<Self, CryptoError> {
        let sd_jwt = Self::parse(input)?;
        if sd_jwt.key_binding.is_some() {
            return Err(CryptoError::UnexpectedKeyBinding);
        }
        Ok(sd_jwt)
    }

    pub fn jwt(&self) -> &str {
        &self.jwt
    }

    pub fn disclosures(&self) -> &[Disclosure] {
        &self.disclosures
    }

    pub fn key_binding(&self) -> Option<&str> {
        self.key_binding.as_deref()
    }

    /// The compact serialization without a key binding JWT, ending in `~`.
    ///
    /// This is also the input of the key binding `sd_hash`.
    pub fn serialize_unbound(&self) -> String {
        let mut out = self.jwt.clone();
        out.push(SEPARATOR);
        for disclosure in &self.disclosures {
            out.push_str(disclosure.encoded());
            out.push(SEPARATOR);
        }
        out
    }

    pub fn serialize(&self) -> String {
        let mut out = self.serialize_unbound();
        if let Some(kb) = &self.key_binding {
            out.push_str(kb);
        }
        out
    }

    /// The issuer-signed payload, without verifying the signature.
    pub fn payload_unverified(&self) -> Result<Map<String, Json>, CryptoError> {
        jws::decode_unverified(&self.jwt).map(|(_, payload)| payload)
    }

    /// The digest algorithm declared by the payload, defaulting to SHA-256.
    pub(crate) fn digest_algorithm(payload: &Map<String, Json>) -> Result<DigestAlgorithm, CryptoError> {
        match payload.get(SD_ALG_CLAIM) {
            None => Ok(DigestAlgorithm::default()),
            Some(Json::String(name)) => DigestAlgorithm::from_name(name),
            Some(_) => Err(CryptoError::Malformed("`_sd_alg` must be a string".into())),
        }
    }

    /// Decodes the credential without verification, for holders inspecting what they own.
    pub fn decode(&self) -> Result<DecodedSdJwt, CryptoError> {
        let (header, payload) = jws::decode_unverified(&self.jwt)?;
        let disclosures = self
            .disclosures
            .iter()
            .map(|d| (d.encoded().to_owned(), d.to_claim()))
            .collect();
        Ok(DecodedSdJwt {
            header,
            payload,
            disclosures,
        })
    }
}

impl std::fmt::Display for SdJwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl std::str::FromStr for SdJwt {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Unverified view of an SD-JWT.
///
/// Each disclosure is listed as its encoded identifier next to its
/// `{claim_name: claim_value}` object, in credential order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSdJwt {
    pub header: Map<String, Json>,
    pub payload: Map<String, Json>,
    pub disclosures: Vec<(String, Map<String, Json>)>,
}

/// Decodes an issuance or presentation string without verification.
pub fn decode(input: &str) -> Result<DecodedSdJwt, CryptoError> {
    SdJwt::parse(input)?.decode()
}
