//! This library provides a Rust implementation of the SD-JWT VC flows of
//! [OID4VCI] and [OID4VP]: an issuer minting selectively disclosable
//! credentials, a holder storing and presenting them, and a verifier
//! checking the presentations.
//!
//! [OID4VCI]: <https://openid.net/specs/openid-4-verifiable-credential-issuance-1_0.html>
//! [OID4VP]: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html>
//!
//! # Issuer Usage
//!
//! ```ignore
//! use openid4vc::config::IssuerConfig;
//! use openid4vc::issuer::{ClientMetadata, CredentialIssuer, CredentialOptions, FieldOption, ValueType};
//!
//! let options = CredentialOptions::new().with_type(
//!     "Identity",
//!     [
//!         ("given_name".to_owned(), FieldOption::new(ValueType::String)),
//!         ("dob".to_owned(), FieldOption::new(ValueType::String)),
//!     ]
//!     .into(),
//! );
//! let mut issuer = CredentialIssuer::new(IssuerConfig::new(base_url), issuer_key, options);
//!
//! // Register the wallet and accept its credential request.
//! let client = issuer.register_client(ClientMetadata::new(redirect_uri.as_str()));
//! let submitted = issuer.submit_request(&client.client_id, "Identity", &redirect_uri, information)?;
//!
//! // Exchange the authorization code, then fetch the credential.
//! let tokens = issuer.token(&token_request)?;
//! let response = issuer.request_credential(&tokens.access_token, credential_identifier, Some(&holder_key))?;
//! ```
//!
//! Request review is delegated to an [`IssuerBackend`]. The default
//! [`TimedBackend`] accepts every request once it has been pending for the
//! configured window.
//!
//! [`IssuerBackend`]: crate::issuer::IssuerBackend
//! [`TimedBackend`]: crate::issuer::TimedBackend
//!
//! # Holder Usage
//!
//! ```ignore
//! use openid4vc::holder::{FieldSelection, Holder, MemoryStorage};
//!
//! let holder = Holder::new(MemoryStorage::default(), holder_key);
//!
//! // Store every credential listed in the token response.
//! holder.acquire_credentials(&issuer_client, &tokens).await?;
//!
//! // Ask the user which requested fields to share, then answer the request.
//! let requested = holder.requested_fields(&request.presentation_definition);
//! let selection = FieldSelection::new().approve_labels(&request.presentation_definition, &["Dob"]);
//! let response = holder.present(&request, &selection).await?;
//! ```
//!
//! Credentials are persisted through a [`StorageProvider`]; deferred
//! credentials are retrieved later with [`Holder::refresh_all_deferred`].
//!
//! [`StorageProvider`]: crate::holder::StorageProvider
//! [`Holder::refresh_all_deferred`]: crate::holder::Holder::refresh_all_deferred
//!
//! # Verifier Usage
//!
//! ```ignore
//! use openid4vc::config::VerifierConfig;
//! use openid4vc::core::sd_jwt::TrustedIssuers;
//! use openid4vc::verifier::Verifier;
//!
//! let resolver = TrustedIssuers::new().with_issuer(issuer_url, issuer_key);
//! let mut verifier = Verifier::new(VerifierConfig::new(base_url, client_id), Arc::new(resolver));
//! verifier.register_definition("age", presentation_definition)?;
//!
//! // Send the request to the wallet.
//! let (uuid, request) = verifier.authorization_request("age", None).await?;
//!
//! // When the wallet responds, verify the response.
//! let outcome = verifier.verify_response(&authorization_response).await?;
//! ```
//!
//! # Protocol Overview
//!
//! ## Issuance
//!
//! 1. *Request submission*: The wallet submits the information to certify and
//!    receives a ticket number and an authorization code.
//! 2. *Token exchange*: The code is exchanged for a [`TokenResponse`] carrying
//!    an access token and the credential identifiers it grants.
//! 3. *Credential retrieval*: The credential is returned at once when the
//!    request has been accepted, or a transaction id to poll otherwise.
//!
//! [`TokenResponse`]: crate::issuer::TokenResponse
//!
//! ## Presentation
//!
//! 4. *Verifier creates request*: The verifier creates an
//!    [`AuthorizationRequestObject`] containing a presentation definition and a
//!    single-use nonce.
//! 5. *Credential matching*: The wallet matches stored credentials against the
//!    fields the user approved and discloses only those.
//! 6. *Response submission*: The wallet returns an [`AuthorizationResponse`]
//!    holding the VP token and presentation submission.
//! 7. *Verification*: The verifier checks signatures, disclosure digests, key
//!    binding and field constraints.
//!
//! [`AuthorizationRequestObject`]: crate::core::authorization_request::AuthorizationRequestObject
//! [`AuthorizationResponse`]: crate::core::response::AuthorizationResponse
//!
//! # Credential Format
//!
//! Only SD-JWT VCs signed with ES256 are supported. Encoding, presentation and
//! verification of SD-JWTs live in the [`core::sd_jwt`] module.
//!
//! [`core::sd_jwt`]: crate::core::sd_jwt

pub mod config;
pub mod core;
pub mod holder;
pub mod issuer;
pub mod utils;
pub mod verifier;
pub use serde_json_path::JsonPath;
