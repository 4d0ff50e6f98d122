use std::{collections::HashMap, fmt::Debug, sync::Arc};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value as Json};
use session::{MemoryStore, Outcome, Session, SessionStore, Status};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::VerifierConfig,
    core::{
        authorization_request::{
            parameters::{ClientIdScheme, Nonce, ResponseMode, ResponseType},
            AuthorizationRequestObject,
        },
        input_descriptor::FieldError,
        presentation_definition::PresentationDefinition,
        presentation_submission::SubmissionError,
        response::{parameters::State, AuthorizationResponse},
        sd_jwt::{verify, CryptoError, KeyResolver, VerifyOptions},
    },
    utils::now_secs,
};

pub mod session;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("presentation for `{descriptor}` failed verification: {error}")]
    Credential {
        descriptor: String,
        error: CryptoError,
    },
    #[error("presentation for `{descriptor}` does not satisfy its constraints: {error}")]
    Constraints {
        descriptor: String,
        error: FieldError,
    },
}

/// The verified claims submitted for one input descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPresentation {
    pub descriptor_id: String,
    pub claims: Map<String, Json>,
}

/// Merges the claims of several presentations. The first presentation
/// disclosing a claim wins.
pub fn merge_claims(presentations: &[VerifiedPresentation]) -> Map<String, Json> {
    let mut merged = Map::new();
    for presentation in presentations {
        for (name, value) in &presentation.claims {
            if !merged.contains_key(name) {
                merged.insert(name.clone(), value.clone());
            }
        }
    }
    merged
}

/// Checks an authorization response against `definition`.
///
/// Each descriptor must be covered by exactly one presentation, which must
/// verify under `options` and satisfy the descriptor's fields.
pub fn verify_presentation<R: KeyResolver + ?Sized>(
    definition: &PresentationDefinition,
    response: &AuthorizationResponse,
    resolver: &R,
    options: &VerifyOptions,
) -> Result<Vec<VerifiedPresentation>, VerificationError> {
    let vp_token = Json::from(&response.vp_token);
    let inputs = response
        .presentation_submission
        .find_inputs(definition, &vp_token)?;

    let mut presentations = Vec::with_capacity(inputs.len());
    for (descriptor, presentation) in inputs {
        let claims = verify(presentation, resolver, options).map_err(|error| {
            VerificationError::Credential {
                descriptor: descriptor.id().to_owned(),
                error,
            }
        })?;
        descriptor
            .validate_claims(&Json::Object(claims.clone()))
            .map_err(|error| VerificationError::Constraints {
                descriptor: descriptor.id().to_owned(),
                error,
            })?;
        presentations.push(VerifiedPresentation {
            descriptor_id: descriptor.id().to_owned(),
            claims,
        });
    }
    Ok(presentations)
}

/// An OpenID4VP verifier accepting SD-JWT VC presentations.
#[derive(Clone)]
pub struct Verifier {
    config: VerifierConfig,
    definitions: HashMap<String, PresentationDefinition>,
    resolver: Arc<dyn KeyResolver + Send + Sync>,
    session_store: Arc<dyn SessionStore + Send + Sync>,
}

impl Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("config", &self.config)
            .field("definitions", &self.definitions)
            .field("session_store", &self.session_store)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// A verifier trusting issuers through `resolver`, with in-memory sessions.
    pub fn new(config: VerifierConfig, resolver: Arc<dyn KeyResolver + Send + Sync>) -> Self {
        Self {
            config,
            definitions: HashMap::new(),
            resolver,
            session_store: Arc::new(MemoryStore::default()),
        }
    }

    pub fn with_session_store(mut self, session_store: Arc<dyn SessionStore + Send + Sync>) -> Self {
        self.session_store = session_store;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Registers `definition` under `reference` for later requests.
    pub fn register_definition(
        &mut self,
        reference: impl Into<String>,
        definition: PresentationDefinition,
    ) -> Result<()> {
        definition.check()?;
        self.definitions.insert(reference.into(), definition);
        Ok(())
    }

    pub fn definition(&self, reference: &str) -> Option<&PresentationDefinition> {
        self.definitions.get(reference)
    }

    /// Creates an authorization request for the definition registered as
    /// `reference`, with a fresh nonce and a new session.
    ///
    /// The session id is sent as `state`.
    pub async fn authorization_request(
        &self,
        reference: &str,
        wallet_nonce: Option<String>,
    ) -> Result<(Uuid, AuthorizationRequestObject)> {
        let Some(definition) = self.definitions.get(reference) else {
            bail!("no presentation definition registered as `{reference}`")
        };
        let uuid = Uuid::new_v4();
        let response_uri = self
            .config
            .base
            .join(&format!("response/{uuid}"))
            .context("failed to build response uri")?;
        let client_id_scheme = if self.config.client_id.starts_with("did:") {
            ClientIdScheme::Did
        } else {
            ClientIdScheme::PreRegistered
        };

        let request = AuthorizationRequestObject {
            client_id: self.config.client_id.clone(),
            client_id_scheme,
            client_metadata: Map::new(),
            presentation_definition: definition.clone(),
            response_uri,
            response_type: ResponseType::VpToken,
            response_mode: ResponseMode::DirectPost,
            nonce: Nonce::random(),
            state: Some(State(uuid.to_string())),
            wallet_nonce,
        };

        self.session_store
            .initiate(Session {
                uuid,
                status: Status::SentRequest,
                definition_reference: reference.to_owned(),
                authorization_request_object: request.clone(),
                created_at: now_secs(),
            })
            .await
            .context("failed to store session")?;
        info!(%uuid, reference, "Created authorization request");
        Ok((uuid, request))
    }

    /// Retrieve the current status of an authorization request.
    pub async fn poll_status(&self, uuid: Uuid) -> Result<Status> {
        self.session_store
            .get_session(uuid)
            .await
            .map(|session| session.status)
    }

    /// Verifies an authorization response and completes its session.
    ///
    /// Fails when `state` names no session awaiting a response, which
    /// includes replays of an already processed response. A response that
    /// reaches verification always completes the session with its
    /// [Outcome].
    pub async fn verify_response(&self, response: &AuthorizationResponse) -> Result<Outcome> {
        let Some(state) = &response.state else {
            bail!("authorization response carries no state")
        };
        let uuid = Uuid::parse_str(&state.0).context("unknown state")?;
        let session = self
            .session_store
            .receive_response(uuid)
            .await
            .context("no session is awaiting this response")?;

        let request = &session.authorization_request_object;
        let options = VerifyOptions {
            expected_audience: Some(request.client_id.clone()),
            expected_nonce: Some(request.nonce.0.clone()),
            require_key_binding: self.config.require_key_binding,
            leeway_secs: self.config.leeway_secs,
            now: None,
        };
        let outcome = match verify_presentation(
            &request.presentation_definition,
            response,
            self.resolver.as_ref(),
            &options,
        ) {
            Ok(presentations) => {
                info!(%uuid, "Presentation verified");
                Outcome::Success { presentations }
            }
            Err(reason) => {
                warn!(%uuid, "Presentation rejected: {reason}");
                Outcome::Failure { reason }
            }
        };

        self.session_store
            .update_status(uuid, Status::Complete(outcome.clone()))
            .await
            .context("failed to update session status")?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use p256::{ecdsa::SigningKey, PublicKey};
    use serde_json::json;

    use super::*;
    use crate::{
        core::{
            presentation_submission::PresentationSubmission,
            response::parameters::VpToken,
            sd_jwt::{construct, IssuancePolicy, KeyBinding, TrustedIssuers},
        },
        holder::{match_definition, FieldSelection},
    };

    const ISSUER: &str = "https://issuer.example/";

    struct Fixture {
        verifier: Verifier,
        issuer_key: SigningKey,
        holder_key: SigningKey,
    }

    fn fixture(require_key_binding: bool) -> Fixture {
        let issuer_key = SigningKey::random(&mut rand::thread_rng());
        let resolver = TrustedIssuers::new().with_issuer(ISSUER, issuer_key.verifying_key().clone());
        let mut config = VerifierConfig::new(
            "https://verifier.example".try_into().unwrap(),
            "did:web:verifier.example",
        );
        config.require_key_binding = require_key_binding;
        let mut verifier = Verifier::new(config, Arc::new(resolver));
        verifier
            .register_definition(
                "age",
                serde_json::from_value(json!({
                    "id": "age",
                    "input_descriptors": [{
                        "id": "dob",
                        "constraints": {"fields": [
                            {"path": ["$.dob"], "filter": {"type": "string"}}
                        ]}
                    }]
                }))
                .unwrap(),
            )
            .unwrap();
        Fixture {
            verifier,
            issuer_key,
            holder_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    impl Fixture {
        fn credential(&self) -> crate::core::sd_jwt::SdJwt {
            let mut payload = Map::new();
            payload.insert("iss".into(), ISSUER.into());
            construct(
                json!({"given_name": "Bob", "dob": "1970-01-01"})
                    .as_object()
                    .unwrap(),
                &payload,
                &self.issuer_key,
                Some(&PublicKey::from(self.holder_key.verifying_key())),
                &IssuancePolicy::default(),
            )
            .unwrap()
        }

        fn respond(&self, request: &AuthorizationRequestObject, nonce: &str) -> AuthorizationResponse {
            let definition = &request.presentation_definition;
            let matched = match_definition(
                definition,
                &FieldSelection::approve_all(definition),
                &[self.credential()],
            )
            .unwrap();
            let key_binding = KeyBinding::new(&self.holder_key, &request.client_id, nonce);
            let (vp_token, submission) = matched.into_vp_token(Some(&key_binding)).unwrap();
            AuthorizationResponse::new(vp_token, submission).with_state(request.state.clone())
        }
    }

    #[tokio::test]
    async fn verifies_and_completes_session() {
        let fixture = fixture(true);
        let (uuid, request) = fixture
            .verifier
            .authorization_request("age", None)
            .await
            .unwrap();
        assert_eq!(request.client_id_scheme, ClientIdScheme::Did);
        assert_eq!(
            request.response_uri.as_str(),
            format!("https://verifier.example/response/{uuid}")
        );
        assert_eq!(
            fixture.verifier.poll_status(uuid).await.unwrap(),
            Status::SentRequest
        );

        let response = fixture.respond(&request, &request.nonce.0);
        let outcome = fixture.verifier.verify_response(&response).await.unwrap();
        let Outcome::Success { presentations } = &outcome else {
            panic!("expected success, got {outcome:?}");
        };
        let claims = merge_claims(presentations);
        assert_eq!(claims["dob"], "1970-01-01");
        assert!(!claims.contains_key("given_name"));
        assert!(matches!(
            fixture.verifier.poll_status(uuid).await.unwrap(),
            Status::Complete(Outcome::Success { .. })
        ));

        assert!(fixture.verifier.verify_response(&response).await.is_err());
    }

    #[tokio::test]
    async fn wrong_nonce_fails_the_session() {
        let fixture = fixture(true);
        let (uuid, request) = fixture
            .verifier
            .authorization_request("age", None)
            .await
            .unwrap();

        let response = fixture.respond(&request, "stale-nonce");
        let outcome = fixture.verifier.verify_response(&response).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Failure {
                reason: VerificationError::Credential {
                    error: CryptoError::KeyBindingInvalid(_),
                    ..
                }
            }
        ));
        assert!(!fixture
            .verifier
            .poll_status(uuid)
            .await
            .unwrap()
            .eq(&Status::SentRequest));
    }

    #[tokio::test]
    async fn unknown_state_is_rejected() {
        let fixture = fixture(false);
        let (_, request) = fixture
            .verifier
            .authorization_request("age", None)
            .await
            .unwrap();
        let response = fixture
            .respond(&request, &request.nonce.0)
            .with_state(Some(State(Uuid::new_v4().to_string())));
        assert!(fixture.verifier.verify_response(&response).await.is_err());
        assert!(fixture
            .verifier
            .authorization_request("unknown", None)
            .await
            .is_err());
    }

    #[test]
    fn missing_descriptor_is_rejected() {
        let fixture = fixture(false);
        let definition = fixture.verifier.definition("age").unwrap();
        let presentation = fixture.credential().present(&[] as &[&str], None).unwrap();
        let response = AuthorizationResponse::new(
            VpToken::Single(presentation),
            PresentationSubmission::for_descriptors("age", &["dob"]).unwrap(),
        );

        let err = verify_presentation(
            definition,
            &response,
            &fixture.issuer_key.verifying_key().clone(),
            &VerifyOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            VerificationError::Constraints {
                descriptor: "dob".into(),
                error: FieldError::Missing("Dob".into()),
            }
        );

        let response = AuthorizationResponse::new(
            response.vp_token,
            PresentationSubmission::for_descriptors("other", &["dob"]).unwrap(),
        );
        assert!(matches!(
            verify_presentation(
                definition,
                &response,
                &fixture.issuer_key.verifying_key().clone(),
                &VerifyOptions::default(),
            ),
            Err(VerificationError::Submission(
                SubmissionError::DefinitionMismatch(_)
            ))
        ));
    }
}
