use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::credential_format::*;
use super::input_descriptor::*;

/// A presentation definition is a JSON object that describes the information a [Verifier](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:verifier) requires of a [Holder](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:holder).
///
/// > Presentation Definitions are objects that articulate what proofs a [Verifier](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:verifier) requires.
/// > These help the [Verifier](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:verifier) to decide how or whether to interact with a [Holder](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:holder).
///
/// Each input descriptor must be satisfied by exactly one credential.
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-definition](https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-definition)
#[derive(Clone, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresentationDefinition {
    id: String,
    input_descriptors: Vec<InputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<ClaimFormatMap>,
}

impl PresentationDefinition {
    /// The Presentation Definition MUST contain an id property. The string SHOULD
    /// provide a unique ID for the desired context.
    ///
    /// The Presentation Definition MUST contain an input_descriptors property,
    /// composed of [InputDescriptor]s.
    pub fn new(id: impl Into<String>, input_descriptor: InputDescriptor) -> Self {
        Self {
            id: id.into(),
            input_descriptors: vec![input_descriptor],
            ..Default::default()
        }
    }

    pub fn id(&self) -> &String {
        &self.id
    }

    /// Add a new input descriptor to the presentation definition.
    pub fn add_input_descriptors(mut self, input_descriptor: InputDescriptor) -> Self {
        self.input_descriptors.push(input_descriptor);
        self
    }

    pub fn input_descriptors(&self) -> &[InputDescriptor] {
        &self.input_descriptors
    }

    /// Return the input descriptors keyed by their id.
    pub fn input_descriptors_map(&self) -> HashMap<&str, &InputDescriptor> {
        self.input_descriptors
            .iter()
            .map(|descriptor| (descriptor.id(), descriptor))
            .collect()
    }

    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    pub fn set_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn purpose(&self) -> Option<&String> {
        self.purpose.as_ref()
    }

    /// Attach a format to the presentation definition.
    ///
    /// The properties inform the [Holder](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:holder) of the Claim format configurations the [Verifier](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:verifier) can process.
    ///
    /// See: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-definition](https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-definition)
    pub fn set_format(mut self, format: ClaimFormatMap) -> Self {
        self.format = Some(format);
        self
    }

    /// Add a new format to the presentation definition.
    pub fn add_format(mut self, format: ClaimFormatDesignation, value: ClaimFormatPayload) -> Self {
        self.format
            .get_or_insert_with(HashMap::new)
            .insert(format, value);
        self
    }

    pub fn format(&self) -> Option<&ClaimFormatMap> {
        self.format.as_ref()
    }

    /// Return the human-readable labels of the fields requested by every
    /// input descriptor.
    ///
    /// `$.given_name` -> Given Name
    /// `$.credentialSubject.familyName` -> Family Name
    pub fn requested_fields(&self) -> Vec<String> {
        self.input_descriptors
            .iter()
            .flat_map(|descriptor| descriptor.constraints().fields())
            .map(ConstraintsField::label)
            .collect()
    }

    /// Checks that descriptor ids are unique and every descriptor admits SD-JWT credentials.
    pub fn check(&self) -> Result<(), DefinitionError> {
        if !admits_sd_jwt(self.format.as_ref(), super::sd_jwt::jws::ES256) {
            return Err(DefinitionError::UnsupportedFormat(self.id.clone()));
        }
        let mut seen = std::collections::HashSet::new();
        for descriptor in &self.input_descriptors {
            if !seen.insert(descriptor.id()) {
                return Err(DefinitionError::DuplicateDescriptor(descriptor.id().to_owned()));
            }
            if !descriptor.admits_sd_jwt() {
                return Err(DefinitionError::UnsupportedFormat(descriptor.id().to_owned()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("input descriptor id `{0}` is used more than once")]
    DuplicateDescriptor(String),
    #[error("`{0}` does not accept ES256 SD-JWT credentials")]
    UnsupportedFormat(String),
}
