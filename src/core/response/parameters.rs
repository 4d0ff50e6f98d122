use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Opaque value binding an authorization response to the request's session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub String);

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// OpenID Connect for Verifiable Presentations specification defines `vp_token` parameter:
///
/// > JSON String or JSON object that MUST contain a single Verifiable Presentation or
/// > an array of JSON Strings and JSON objects each of them containing a Verifiable Presentations.
///
/// SD-JWT presentations are always strings, in their compact `~`-separated form.
///
/// See: [OpenID.VP#section-6.1-2.2](https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.1-2.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpToken {
    Single(String),
    Many(Vec<String>),
}

impl VpToken {
    /// Wraps presentations the way a presentation submission addresses them:
    /// one presentation stands alone, several form an array.
    pub fn from_presentations(mut presentations: Vec<String>) -> Self {
        if presentations.len() == 1 {
            Self::Single(presentations.remove(0))
        } else {
            Self::Many(presentations)
        }
    }

    pub fn presentations(&self) -> Vec<&str> {
        match self {
            Self::Single(p) => vec![p.as_str()],
            Self::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

impl TryFrom<Json> for VpToken {
    type Error = Error;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        match value {
            Json::String(s) => Ok(Self::Single(s)),
            Json::Array(arr) => arr
                .into_iter()
                .map(|item| match item {
                    Json::String(s) => Ok(s),
                    _ => bail!("vp_token entries must be strings"),
                })
                .collect::<Result<Vec<_>, Error>>()
                .map(Self::Many),
            _ => bail!("Invalid vp_token"),
        }
    }
}

impl From<VpToken> for Json {
    fn from(value: VpToken) -> Self {
        match value {
            VpToken::Single(s) => Json::String(s),
            VpToken::Many(tokens) => Json::Array(tokens.into_iter().map(Json::String).collect()),
        }
    }
}

impl From<&VpToken> for Json {
    fn from(value: &VpToken) -> Self {
        value.clone().into()
    }
}

impl Serialize for VpToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Json::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VpToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Json::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}
