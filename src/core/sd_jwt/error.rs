use thiserror::Error;

/// Errors raised while issuing, presenting or verifying an SD-JWT.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("disclosure digest `{0}` is not committed to by the credential")]
    DigestMismatch(String),
    #[error("registered claim `{0}` cannot be selectively disclosed")]
    RegisteredClaimDisclosed(String),
    /// A disclosure names a claim the credential already carries.
    #[error("disclosure would overwrite claim `{0}`")]
    ClaimShadowed(String),
    #[error("key binding is enforced but no holder key was supplied")]
    MissingHolderKey,
    #[error("key binding proof is invalid: {0}")]
    KeyBindingInvalid(String),
    #[error("a freshly issued credential must not carry a key binding proof")]
    UnexpectedKeyBinding,
    #[error("disclosure `{0}` appears more than once")]
    DuplicateDisclosure(String),
    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("credential has expired")]
    Expired,
    #[error("no verification key known for issuer `{0}`")]
    UnknownIssuer(String),
    #[error("malformed SD-JWT: {0}")]
    Malformed(String),
}

impl CryptoError {
    pub(crate) fn malformed(e: impl std::fmt::Display) -> Self {
        Self::Malformed(e.to_string())
    }
}
