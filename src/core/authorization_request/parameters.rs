use std::fmt;

use serde::{Deserialize, Serialize};

const DID: &str = "did";
const PREREGISTERED: &str = "pre-registered";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ClientIdScheme {
    Did,
    PreRegistered,
    Other(String),
}

impl From<String> for ClientIdScheme {
    fn from(s: String) -> Self {
        match s.as_str() {
            DID => ClientIdScheme::Did,
            PREREGISTERED => ClientIdScheme::PreRegistered,
            _ => ClientIdScheme::Other(s),
        }
    }
}

impl From<ClientIdScheme> for String {
    fn from(scheme: ClientIdScheme) -> Self {
        match scheme {
            ClientIdScheme::Did => DID.into(),
            ClientIdScheme::PreRegistered => PREREGISTERED.into(),
            ClientIdScheme::Other(s) => s,
        }
    }
}

const DIRECT_POST: &str = "direct_post";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ResponseMode {
    /// The `direct_post` response mode as defined in OID4VP.
    DirectPost,
    /// A ResponseMode that is unsupported by this library.
    Unsupported(String),
}

impl From<String> for ResponseMode {
    fn from(s: String) -> Self {
        match s.as_str() {
            DIRECT_POST => ResponseMode::DirectPost,
            _ => ResponseMode::Unsupported(s),
        }
    }
}

impl From<ResponseMode> for String {
    fn from(s: ResponseMode) -> Self {
        match s {
            ResponseMode::DirectPost => DIRECT_POST.into(),
            ResponseMode::Unsupported(u) => u,
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::DirectPost => DIRECT_POST,
            ResponseMode::Unsupported(u) => u,
        }
        .fmt(f)
    }
}

const VP_TOKEN: &str = "vp_token";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(into = "String", from = "String")]
pub enum ResponseType {
    VpToken,
    Unsupported(String),
}

impl From<ResponseType> for String {
    fn from(rt: ResponseType) -> Self {
        match rt {
            ResponseType::VpToken => VP_TOKEN.into(),
            ResponseType::Unsupported(s) => s,
        }
    }
}

impl From<String> for ResponseType {
    fn from(s: String) -> Self {
        match s.as_str() {
            VP_TOKEN => ResponseType::VpToken,
            _ => ResponseType::Unsupported(s),
        }
    }
}

/// Single-use value the holder echoes in its key binding proof.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(pub String);

impl Nonce {
    pub fn random() -> Self {
        Self(crate::utils::random_token(16))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
