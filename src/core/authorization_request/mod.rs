use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use url::Url;

use self::parameters::{ClientIdScheme, Nonce, ResponseMode, ResponseType};
use super::{presentation_definition::PresentationDefinition, response::parameters::State};

pub mod parameters;

/// An OpenID4VP authorization request, asking a wallet to post an SD-JWT
/// presentation satisfying `presentation_definition` to `response_uri`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequestObject {
    pub client_id: String,
    pub client_id_scheme: ClientIdScheme,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub client_metadata: Map<String, Json>,
    pub presentation_definition: PresentationDefinition,
    pub response_uri: Url,
    pub response_type: ResponseType,
    pub response_mode: ResponseMode,
    pub nonce: Nonce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    /// Echo of the nonce a wallet supplied when fetching the request by reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_nonce: Option<String>,
}

impl AuthorizationRequestObject {
    /// Checks the parameters a holder relies on when answering.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.response_type != ResponseType::VpToken {
            anyhow::bail!(
                "unsupported response_type `{}`",
                String::from(self.response_type.clone())
            );
        }
        if self.response_mode != ResponseMode::DirectPost {
            anyhow::bail!("unsupported response_mode `{}`", self.response_mode);
        }
        self.presentation_definition.check()?;
        Ok(())
    }
}
