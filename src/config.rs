use serde::Deserialize;
use url::Url;

use crate::core::sd_jwt::DigestAlgorithm;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    /// Issuer identifier, used as the `iss` of every credential.
    pub base: BaseUrl,
    /// How long a submitted request stays pending before it is accepted.
    #[serde(default = "default_pending_window")]
    pub pending_window_secs: u64,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime_secs: u64,
    /// Adds an `exp` claim this many seconds after issuance.
    #[serde(default)]
    pub credential_lifetime_secs: Option<u64>,
    /// Refuse credential requests that carry no holder key.
    #[serde(default)]
    pub enforce_key_binding: bool,
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
}

fn default_pending_window() -> u64 {
    40
}

fn default_access_token_lifetime() -> u64 {
    3600
}

impl IssuerConfig {
    pub fn new(base: BaseUrl) -> Self {
        Self {
            base,
            pending_window_secs: default_pending_window(),
            access_token_lifetime_secs: default_access_token_lifetime(),
            credential_lifetime_secs: None,
            enforce_key_binding: false,
            digest_algorithm: DigestAlgorithm::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Where wallets post their authorization responses.
    pub base: BaseUrl,
    /// The verifier's client identifier, expected as key binding audience.
    pub client_id: String,
    #[serde(default)]
    pub require_key_binding: bool,
    /// Tolerated clock skew on key binding `iat` and credential `exp`.
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

fn default_leeway() -> u64 {
    300
}

impl VerifierConfig {
    pub fn new(base: BaseUrl, client_id: impl Into<String>) -> Self {
        Self {
            base,
            client_id: client_id.into(),
            require_key_binding: false,
            leeway_secs: default_leeway(),
        }
    }
}

/// A url that is always a base (can be safely join()'ed with further path elements without
/// mangling).
#[derive(Deserialize, Debug, Clone, Hash, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct BaseUrl(Url);

impl std::ops::Deref for BaseUrl {
    type Target = Url;

    fn deref(&self) -> &Url {
        &self.0
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = url::ParseError;

    fn try_from(mut url: String) -> Result<Self, Self::Error> {
        // Make URL a base.
        if !url.ends_with('/') {
            url += "/"
        }
        url.parse().map(Self)
    }
}

impl TryFrom<&str> for BaseUrl {
    type Error = url::ParseError;

    fn try_from(url: &str) -> Result<Self, Self::Error> {
        Self::try_from(url.to_owned())
    }
}
