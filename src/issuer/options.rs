use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use super::ProtocolError;

/// JSON type expected for a submitted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    fn admits(&self, value: &Json) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default = "mandatory_by_default")]
    pub mandatory: bool,
}

fn mandatory_by_default() -> bool {
    true
}

impl FieldOption {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            mandatory: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }
}

/// The fields an applicant submits for one credential type.
pub type CredentialForm = BTreeMap<String, FieldOption>;

/// The credential types an issuer offers, each with its submission form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialOptions(BTreeMap<String, CredentialForm>);

impl CredentialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, credential_type: impl Into<String>, form: CredentialForm) -> Self {
        self.0.insert(credential_type.into(), form);
        self
    }

    pub fn form(&self, credential_type: &str) -> Option<&CredentialForm> {
        self.0.get(credential_type)
    }

    pub fn credential_types(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Checks submitted `information` against the form of `credential_type`.
    ///
    /// `null` stands for an omitted field and is only accepted for optional
    /// fields.
    pub fn check(
        &self,
        credential_type: &str,
        information: &Map<String, Json>,
    ) -> Result<(), ProtocolError> {
        let form = self.form(credential_type).ok_or_else(|| {
            ProtocolError::InvalidRequest(format!(
                "credential type `{credential_type}` is not supported"
            ))
        })?;

        for (name, option) in form {
            match information.get(name) {
                None | Some(Json::Null) if option.mandatory => {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "field `{name}` is mandatory"
                    )));
                }
                None | Some(Json::Null) => {}
                Some(value) if !option.value_type.admits(value) => {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "field `{name}` must be of type {}",
                        option.value_type.name()
                    )));
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = information.keys().find(|name| !form.contains_key(*name)) {
            return Err(ProtocolError::InvalidRequest(format!(
                "field `{unknown}` is not part of `{credential_type}`"
            )));
        }
        Ok(())
    }
}
