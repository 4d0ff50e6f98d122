use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use self::parameters::{State, VpToken};
use super::presentation_submission::PresentationSubmission;

pub mod parameters;

/// The wallet's answer to an authorization request, posted to the
/// verifier's `response_uri` with `response_mode=direct_post`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub vp_token: VpToken,
    pub presentation_submission: PresentationSubmission,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

/// Form encoding: every parameter is a string, structured values are JSON encoded.
#[derive(Serialize, Deserialize)]
struct FormResponse {
    vp_token: String,
    presentation_submission: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<String>,
}

impl AuthorizationResponse {
    pub fn new(vp_token: VpToken, presentation_submission: PresentationSubmission) -> Self {
        Self {
            vp_token,
            presentation_submission,
            state: None,
        }
    }

    pub fn with_state(mut self, state: Option<State>) -> Self {
        self.state = state;
        self
    }

    /// Encodes the response as an `application/x-www-form-urlencoded` body.
    pub fn as_form(&self) -> Result<String, Error> {
        let vp_token = match &self.vp_token {
            VpToken::Single(presentation) => presentation.clone(),
            many => serde_json::to_string(&Json::from(many))?,
        };
        let form = FormResponse {
            vp_token,
            presentation_submission: serde_json::to_string(&self.presentation_submission)?,
            state: self.state.as_ref().map(|s| s.0.clone()),
        };
        Ok(serde_urlencoded::to_string(form)?)
    }

    /// Parses an `application/x-www-form-urlencoded` body.
    pub fn from_form(body: &str) -> Result<Self, Error> {
        let form: FormResponse =
            serde_urlencoded::from_str(body).context("failed to decode response form")?;
        let vp_token = if form.vp_token.starts_with('[') {
            let value: Json =
                serde_json::from_str(&form.vp_token).context("vp_token is not valid JSON")?;
            VpToken::try_from(value)?
        } else {
            VpToken::Single(form.vp_token)
        };
        let presentation_submission = serde_json::from_str(&form.presentation_submission)
            .context("presentation_submission is not valid JSON")?;
        Ok(Self {
            vp_token,
            presentation_submission,
            state: form.state.map(State),
        })
    }
}
