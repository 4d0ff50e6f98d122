use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use serde_json_path::JsonPath;
use tracing::{debug, warn};

use super::{
    credential_format::{admits_sd_jwt, ClaimFormatMap},
    sd_jwt::DecodedSdJwt,
};
use crate::utils::{to_human_readable_string, NonEmptyVec};

/// Input Descriptors are objects used to describe the information a
/// [Verifier](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:verifier) requires of a
/// [Holder](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:holder).
///
/// All Input Descriptors MUST be satisfied, each by exactly one credential.
///
/// See: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object](https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputDescriptor {
    id: String,
    #[serde(default)]
    constraints: Constraints,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<ClaimFormatMap>,
}

impl InputDescriptor {
    /// Create a new instance of the input descriptor with the given id and constraints.
    ///
    /// The id MUST NOT conflict with the id of another Input Descriptor in the
    /// same Presentation Definition.
    pub fn new(id: impl Into<String>, constraints: Constraints) -> Self {
        Self {
            id: id.into(),
            constraints,
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    /// Set the purpose of the input descriptor.
    ///
    /// If present, the purpose describes why the
    /// [Claim](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:claim)'s
    /// data is being requested.
    pub fn set_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn purpose(&self) -> Option<&String> {
        self.purpose.as_ref()
    }

    /// Constrain submission of this input to a subset of formats or algorithms.
    pub fn set_format(mut self, format: ClaimFormatMap) -> Self {
        self.format = Some(format);
        self
    }

    pub fn format(&self) -> Option<&ClaimFormatMap> {
        self.format.as_ref()
    }

    /// Whether an ES256-signed SD-JWT VC may be submitted for this descriptor.
    pub fn admits_sd_jwt(&self) -> bool {
        admits_sd_jwt(self.format.as_ref(), crate::core::sd_jwt::jws::ES256)
    }

    /// Return the requested field names of the input descriptor, in order.
    pub fn requested_fields(&self) -> Vec<String> {
        self.constraints()
            .fields()
            .iter()
            .filter_map(ConstraintsField::requested_field)
            .collect()
    }

    /// Checks the claims disclosed for this descriptor.
    ///
    /// Every non-optional field must resolve and pass its filter. Optional
    /// fields only need to pass their filter when they resolve at all.
    pub fn validate_claims(&self, claims: &Json) -> Result<(), FieldError> {
        for field in self.constraints.fields() {
            match field.evaluate(claims) {
                Ok(true) => {}
                Ok(false) if field.is_optional() => {}
                Ok(false) => return Err(FieldError::Missing(field.label())),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Why a set of claims fails an input descriptor.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("required field `{0}` was not disclosed or did not pass its filter")]
    Missing(String),
    #[error("field `{0}` has an invalid filter: {1}")]
    InvalidFilter(String, String),
}

/// Constraints are objects used to describe the constraints that a [Holder](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:holder) must satisfy to fulfill an Input Descriptor.
///
/// A constraint object MAY be empty, or it may include a `fields` and/or `limit_disclosure` property.
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object](https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<ConstraintsField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_disclosure: Option<ConstraintsLimitDisclosure>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new field constraint to the constraints list.
    pub fn add_constraint(mut self, field: ConstraintsField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[ConstraintsField] {
        &self.fields
    }

    /// Set the limit disclosure value.
    ///
    /// With `required`, the submission must be limited to the entries specified
    /// in the `fields` property. SD-JWT presentations built by this crate only
    /// ever reveal matched claims, so both values are honoured alike.
    ///
    /// For more information: see [https://identity.foundation/presentation-exchange/spec/v2.0.0/#limited-disclosure-submissions](https://identity.foundation/presentation-exchange/spec/v2.0.0/#limited-disclosure-submissions)
    pub fn set_limit_disclosure(mut self, limit_disclosure: ConstraintsLimitDisclosure) -> Self {
        self.limit_disclosure = Some(limit_disclosure);
        self
    }

    pub fn limit_disclosure(&self) -> Option<&ConstraintsLimitDisclosure> {
        self.limit_disclosure.as_ref()
    }

    /// Returns if the constraints fields contain non-optional
    /// fields that must be satisfied.
    pub fn is_required(&self) -> bool {
        self.fields.iter().any(|field| field.is_required())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintsLimitDisclosure {
    Required,
    Preferred,
}

/// Where a field was found within an SD-JWT credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClaimLocation {
    /// In the always-disclosed, issuer-signed payload.
    Payload,
    /// In the disclosure with this encoded form.
    Disclosure(String),
}

/// ConstraintsField objects are used to describe the constraints that a
/// [Holder](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:holder)
/// must satisfy to fulfill an Input Descriptor.
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object](https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintsField {
    path: NonEmptyVec<JsonPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional: Option<bool>,
    #[serde(default)]
    intent_to_retain: bool,
}

impl From<NonEmptyVec<JsonPath>> for ConstraintsField {
    fn from(path: NonEmptyVec<JsonPath>) -> Self {
        Self {
            path,
            id: None,
            purpose: None,
            name: None,
            filter: None,
            optional: None,
            intent_to_retain: false,
        }
    }
}

impl ConstraintsField {
    /// Create a new instance of the constraints field with the given path.
    pub fn new(path: JsonPath) -> ConstraintsField {
        NonEmptyVec::new(path).into()
    }

    /// Add an alternative path, tried after the existing ones.
    pub fn add_path(mut self, path: JsonPath) -> Self {
        self.path.push(path);
        self
    }

    /// `path` is a non empty list of [JsonPath](https://goessner.net/articles/JsonPath/) expressions.
    pub fn path(&self) -> &NonEmptyVec<JsonPath> {
        &self.path
    }

    pub fn set_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }

    pub fn set_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn purpose(&self) -> Option<&String> {
        self.purpose.as_ref()
    }

    /// Set a human-friendly name describing what the target field represents.
    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    /// Set the JSON Schema the values found at `path` must validate against.
    pub fn set_filter(mut self, filter: Json) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filter(&self) -> Option<&Json> {
        self.filter.as_ref()
    }

    /// Return a JSON schema validator using the internal filter.
    ///
    /// If no filter is provided on the constraint field, this
    /// will return None.
    ///
    /// # Errors
    ///
    /// If the filter is invalid, this will return an error.
    pub fn validator(&self) -> Option<Result<JSONSchema, ValidationError>> {
        self.filter.as_ref().map(JSONSchema::compile)
    }

    pub fn set_optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }

    /// Inverse alias for `!is_optional()`.
    pub fn is_required(&self) -> bool {
        !self.is_optional()
    }

    /// Set the verifier's intent to retain the field after verification.
    pub fn set_retained(mut self, intent_to_retain: bool) -> Self {
        self.intent_to_retain = intent_to_retain;
        self
    }

    pub fn intent_to_retain(&self) -> bool {
        self.intent_to_retain
    }

    /// The claim name the first path points at.
    ///
    /// e.g., `$.credentialSubject.dateOfBirth` and `$['dateOfBirth']` both yield `dateOfBirth`.
    pub fn requested_field(&self) -> Option<String> {
        let path = self.path.first().to_string();
        path.rsplit(['.', '['])
            .next()
            .map(|last| last.trim_matches(|c| matches!(c, ']' | '\'' | '"')))
            .filter(|last| !last.is_empty() && *last != "$")
            .map(ToOwned::to_owned)
    }

    /// A label for the field: its `name` if set, otherwise the humanly
    /// readable requested field.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.requested_field().map(to_human_readable_string))
            .unwrap_or_else(|| self.path.first().to_string())
    }

    /// Whether some value at one of the paths in `value` passes the filter.
    pub fn evaluate(&self, value: &Json) -> Result<bool, FieldError> {
        let validator = match self.validator() {
            None => None,
            Some(Ok(validator)) => Some(validator),
            Some(Err(e)) => return Err(FieldError::InvalidFilter(self.label(), e.to_string())),
        };
        Ok(self
            .path
            .iter()
            .any(|path| matches_at(path, value, validator.as_ref())))
    }

    /// Finds the first place this field is satisfied in `credential`.
    ///
    /// Paths are tried in order; for each, the signed payload is searched
    /// before the disclosures, which are searched in credential order.
    /// A field with an invalid filter matches nothing.
    pub fn locate(&self, credential: &DecodedSdJwt) -> Option<ClaimLocation> {
        let validator = match self.validator() {
            None => None,
            Some(Ok(validator)) => Some(validator),
            Some(Err(e)) => {
                warn!("Field `{}` has an invalid filter: {e}", self.label());
                return None;
            }
        };
        let payload = Json::Object(credential.payload.clone());

        for path in self.path.iter() {
            if matches_at(path, &payload, validator.as_ref()) {
                return Some(ClaimLocation::Payload);
            }
            for (encoded, claim) in &credential.disclosures {
                if matches_at(path, &Json::Object(claim.clone()), validator.as_ref()) {
                    return Some(ClaimLocation::Disclosure(encoded.clone()));
                }
            }
        }
        None
    }
}

fn matches_at(path: &JsonPath, value: &Json, validator: Option<&JSONSchema>) -> bool {
    path.query(value).iter().any(|node| match validator {
        None => true,
        Some(validator) => match validator.validate(node) {
            Ok(()) => true,
            Err(errors) => {
                for error in errors {
                    debug!("Field did not pass filter validation: {error}");
                }
                false
            }
        },
    })
}
