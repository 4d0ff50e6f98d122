use core::fmt;
use std::{borrow::Cow, collections::HashMap, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

const FORMAT_VC_SD_JWT: &str = "vc+sd-jwt";
const FORMAT_DC_SD_JWT: &str = "dc+sd-jwt";
const FORMAT_JWT_VC_JSON: &str = "jwt_vc_json";

/// A Json object of claim formats, as found in the `format` property of
/// presentation definitions and input descriptors.
pub type ClaimFormatMap = HashMap<ClaimFormatDesignation, ClaimFormatPayload>;

/// Algorithm constraints for an SD-JWT based claim format.
///
/// An empty list places no constraint on the corresponding algorithm.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimFormatPayload {
    #[serde(
        rename = "sd-jwt_alg_values",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sd_jwt_alg_values: Vec<String>,
    #[serde(
        rename = "kb-jwt_alg_values",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub kb_jwt_alg_values: Vec<String>,
    /// Parameters of other claim formats.
    #[serde(flatten)]
    pub other: Map<String, Json>,
}

impl ClaimFormatPayload {
    /// Adds an algorithm value to the list of supported issuer-signed JWT algorithms.
    pub fn add_sd_jwt_alg(mut self, alg: impl Into<String>) -> Self {
        self.sd_jwt_alg_values.push(alg.into());
        self
    }

    pub fn add_kb_jwt_alg(mut self, alg: impl Into<String>) -> Self {
        self.kb_jwt_alg_values.push(alg.into());
        self
    }

    pub fn accepts_sd_jwt_alg(&self, alg: &str) -> bool {
        self.sd_jwt_alg_values.is_empty() || self.sd_jwt_alg_values.iter().any(|a| a == alg)
    }

    pub fn accepts_kb_jwt_alg(&self, alg: &str) -> bool {
        self.kb_jwt_alg_values.is_empty() || self.kb_jwt_alg_values.iter().any(|a| a == alg)
    }
}

/// The claim format designation type is used in the input description object to specify the format of the claim.
///
/// Registry of claim format type: https://identity.foundation/claim-format-registry/#registry
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClaimFormatDesignation {
    /// IETF SD-JWT Verifiable Credential, as designated by OpenID4VC drafts
    /// before the media type was renamed.
    VcSdJwt,

    /// IETF SD-JWT Verifiable Credential under its current `dc+sd-jwt` name.
    DcSdJwt,

    /// W3C Verifiable Credential secured as a JWT.
    JwtVcJson,

    /// Other claim format designations not covered by the above.
    ///
    /// The value of this variant is the name of the claim format designation.
    Other(String),
}

impl ClaimFormatDesignation {
    pub fn from_name(name: Cow<str>) -> Self {
        match name.as_ref() {
            FORMAT_VC_SD_JWT => Self::VcSdJwt,
            FORMAT_DC_SD_JWT => Self::DcSdJwt,
            FORMAT_JWT_VC_JSON => Self::JwtVcJson,
            _ => Self::Other(name.into_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::VcSdJwt => FORMAT_VC_SD_JWT,
            Self::DcSdJwt => FORMAT_DC_SD_JWT,
            Self::JwtVcJson => FORMAT_JWT_VC_JSON,
            Self::Other(other) => other,
        }
    }

    /// Whether credentials of this format are SD-JWTs.
    pub fn is_sd_jwt(&self) -> bool {
        matches!(self, Self::VcSdJwt | Self::DcSdJwt)
    }
}

impl From<&str> for ClaimFormatDesignation {
    fn from(s: &str) -> Self {
        Self::from_name(Cow::Borrowed(s))
    }
}

impl From<String> for ClaimFormatDesignation {
    fn from(value: String) -> Self {
        Self::from_name(Cow::Owned(value))
    }
}

impl FromStr for ClaimFormatDesignation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl fmt::Display for ClaimFormatDesignation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl Serialize for ClaimFormatDesignation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.name().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ClaimFormatDesignation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Into::into)
    }
}

/// Whether a `format` constraint admits ES256-signed SD-JWT credentials.
///
/// An absent or empty map places no constraint.
pub fn admits_sd_jwt(formats: Option<&ClaimFormatMap>, alg: &str) -> bool {
    match formats {
        None => true,
        Some(formats) if formats.is_empty() => true,
        Some(formats) => formats
            .iter()
            .any(|(designation, payload)| designation.is_sd_jwt() && payload.accepts_sd_jwt_alg(alg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_credential_format_serialization() {
        let value = json!({
          "vc+sd-jwt": {
            "sd-jwt_alg_values": ["ES256", "ES384"],
            "kb-jwt_alg_values": ["ES256"]
          },
          "jwt_vc_json": {
            "alg": ["ES256K"]
          },
          "com.example.custom_vc": {
            "version": "1.0"
          }
        });

        let claim_format_map: ClaimFormatMap =
            serde_json::from_value(value).expect("Failed to parse claim format map");

        let sd_jwt = &claim_format_map[&ClaimFormatDesignation::VcSdJwt];
        assert!(sd_jwt.accepts_sd_jwt_alg("ES256"));
        assert!(!sd_jwt.accepts_sd_jwt_alg("EdDSA"));
        assert!(sd_jwt.accepts_kb_jwt_alg("ES256"));
        assert_eq!(
            claim_format_map[&ClaimFormatDesignation::JwtVcJson].other["alg"],
            json!(["ES256K"])
        );
        assert!(claim_format_map.contains_key(&ClaimFormatDesignation::Other(
            "com.example.custom_vc".to_string()
        )));
    }

    #[test]
    fn sd_jwt_admission() {
        assert!(admits_sd_jwt(None, "ES256"));

        let mut formats = ClaimFormatMap::new();
        formats.insert(
            ClaimFormatDesignation::JwtVcJson,
            ClaimFormatPayload::default(),
        );
        assert!(!admits_sd_jwt(Some(&formats), "ES256"));

        formats.insert(
            ClaimFormatDesignation::DcSdJwt,
            ClaimFormatPayload::default().add_sd_jwt_alg("ES384"),
        );
        assert!(!admits_sd_jwt(Some(&formats), "ES256"));
        assert!(admits_sd_jwt(Some(&formats), "ES384"));
    }

    #[test]
    fn designation_names() {
        assert_eq!(ClaimFormatDesignation::from("vc+sd-jwt"), ClaimFormatDesignation::VcSdJwt);
        assert_eq!(ClaimFormatDesignation::DcSdJwt.to_string(), "dc+sd-jwt");
        assert_eq!(
            serde_json::to_value(ClaimFormatDesignation::VcSdJwt).unwrap(),
            json!("vc+sd-jwt")
        );
    }
}
