use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use serde_json_path::JsonPath;

use super::{
    credential_format::*, input_descriptor::*, presentation_definition::PresentationDefinition,
};

/// A DescriptorMapId is a unique identifier for a DescriptorMap.
pub type DescriptorMapId = String;

/// Presentation Submissions are objects embedded within target
/// [Claim](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:claim) negotiation
/// formats that express how the inputs presented as proofs to a
/// [Verifier](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:verifier) are
/// provided in accordance with the requirements specified in a [PresentationDefinition].
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-submission](https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-submission)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresentationSubmission {
    id: uuid::Uuid,
    definition_id: DescriptorMapId,
    descriptor_map: Vec<DescriptorMap>,
}

impl PresentationSubmission {
    /// The presentation submission MUST contain an id property, a `definition_id`
    /// matching a [PresentationDefinition::id()], and a `descriptor_map`.
    pub fn new(
        id: uuid::Uuid,
        definition_id: DescriptorMapId,
        descriptor_map: Vec<DescriptorMap>,
    ) -> Self {
        Self {
            id,
            definition_id,
            descriptor_map,
        }
    }

    /// Builds the submission for SD-JWT presentations of the given descriptors,
    /// in `vp_token` order.
    ///
    /// A single presentation is addressed as `$`, several as `$[i]`.
    pub fn for_descriptors<S: AsRef<str>>(
        definition_id: impl Into<DescriptorMapId>,
        descriptor_ids: &[S],
    ) -> Result<Self, SubmissionError> {
        let single = descriptor_ids.len() == 1;
        let descriptor_map = descriptor_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let path = if single {
                    "$".to_string()
                } else {
                    format!("$[{i}]")
                };
                let path = JsonPath::parse(&path)
                    .map_err(|e| SubmissionError::InvalidPath(id.as_ref().to_owned(), e.to_string()))?;
                Ok(DescriptorMap::new(
                    id.as_ref(),
                    ClaimFormatDesignation::VcSdJwt,
                    path,
                ))
            })
            .collect::<Result<_, SubmissionError>>()?;
        Ok(Self::new(
            uuid::Uuid::new_v4(),
            definition_id.into(),
            descriptor_map,
        ))
    }

    pub fn id(&self) -> &uuid::Uuid {
        &self.id
    }

    pub fn definition_id(&self) -> &String {
        &self.definition_id
    }

    pub fn descriptor_map(&self) -> &[DescriptorMap] {
        &self.descriptor_map
    }

    /// Resolves every descriptor map entry against `vp_token`, returning each
    /// input descriptor with the single presentation submitted for it.
    ///
    /// Every input descriptor of `definition` must be covered exactly once.
    pub fn find_inputs<'a>(
        &self,
        definition: &'a PresentationDefinition,
        vp_token: &'a Json,
    ) -> Result<Vec<(&'a InputDescriptor, &'a str)>, SubmissionError> {
        if self.definition_id != *definition.id() {
            return Err(SubmissionError::DefinitionMismatch(
                self.definition_id.clone(),
            ));
        }

        let input_descriptors = definition.input_descriptors_map();
        let mut covered = HashSet::new();
        let mut inputs = Vec::with_capacity(self.descriptor_map.len());

        for entry in &self.descriptor_map {
            let descriptor = *input_descriptors
                .get(entry.id.as_str())
                .ok_or_else(|| SubmissionError::UndefinedInputDescriptor(entry.id.clone()))?;
            if !covered.insert(descriptor.id()) {
                return Err(SubmissionError::DuplicateInput(entry.id.clone()));
            }
            if !entry.format.is_sd_jwt() {
                return Err(SubmissionError::FormatMismatch(entry.format.clone()));
            }
            inputs.push((descriptor, entry.resolve(vp_token)?));
        }

        for descriptor in definition.input_descriptors() {
            if !covered.contains(descriptor.id()) {
                return Err(SubmissionError::MissingRequiredInput(
                    descriptor.id().to_owned(),
                ));
            }
        }

        Ok(inputs)
    }
}

/// Descriptor Maps are objects used to describe the information a [Holder](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:holder) provides to a [Verifier](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:verifier).
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-submission](https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-submission)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescriptorMap {
    pub id: DescriptorMapId,
    pub format: ClaimFormatDesignation,
    pub path: JsonPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_nested: Option<Box<DescriptorMap>>,
}

impl DescriptorMap {
    /// The descriptor map MUST include an `id` matching an [InputDescriptor::id()],
    /// a `format` naming a [ClaimFormatDesignation], and a `path` locating the
    /// submitted [Claim](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:claim)
    /// from the top-level of the `vp_token`.
    pub fn new(
        id: impl Into<DescriptorMapId>,
        format: impl Into<ClaimFormatDesignation>,
        path: JsonPath,
    ) -> Self {
        Self {
            id: id.into(),
            format: format.into(),
            path,
            path_nested: None,
        }
    }

    /// Evaluates `path` against `vp_token`, which must yield exactly one string.
    ///
    /// SD-JWT presentations are strings, so nested paths are not supported.
    pub fn resolve<'a>(&self, vp_token: &'a Json) -> Result<&'a str, SubmissionError> {
        if self.path_nested.is_some() {
            return Err(SubmissionError::NestingUnsupported(self.format.clone()));
        }
        let nodes = self.path.query(vp_token).all();
        let [node] = nodes.as_slice() else {
            return Err(SubmissionError::PathMismatch {
                id: self.id.clone(),
                found: nodes.len(),
            });
        };
        node.as_str()
            .ok_or_else(|| SubmissionError::NotAPresentation(self.id.clone()))
    }
}

/// Presentation submission error.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("submission refers to unknown presentation definition `{0}`")]
    DefinitionMismatch(String),

    /// Submission contains inputs that are not defined in the presentation
    /// definition.
    #[error("undefined input descriptor: {0}")]
    UndefinedInputDescriptor(String),

    #[error("input descriptor `{0}` is submitted more than once")]
    DuplicateInput(String),

    /// Missing an input required by the presentation definition.
    #[error("missing required input `{0}`")]
    MissingRequiredInput(String),

    /// Input format does not match the format expected by the presentation
    /// definition.
    #[error("format mismatch: unexpected format {0}")]
    FormatMismatch(ClaimFormatDesignation),

    /// Nesting is not supported for a given claim format.
    #[error("nesting is not supported for claim format {0}")]
    NestingUnsupported(ClaimFormatDesignation),

    #[error("path for `{id}` must match exactly one presentation, found {found}")]
    PathMismatch { id: String, found: usize },

    #[error("path for `{0}` does not point at an SD-JWT presentation")]
    NotAPresentation(String),

    #[error("invalid path for `{0}`: {1}")]
    InvalidPath(String, String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn definition() -> PresentationDefinition {
        PresentationDefinition::new("def", InputDescriptor::new("a", Constraints::new()))
            .add_input_descriptors(InputDescriptor::new("b", Constraints::new()))
    }

    #[test]
    fn single_descriptor_uses_root_path() {
        let submission = PresentationSubmission::for_descriptors("def", &["a"]).unwrap();
        let value = serde_json::to_value(&submission).unwrap();
        assert_eq!(value["definition_id"], "def");
        assert_eq!(
            value["descriptor_map"],
            json!([{"id": "a", "format": "vc+sd-jwt", "path": "$"}])
        );
    }

    #[test]
    fn several_descriptors_are_indexed() {
        let submission = PresentationSubmission::for_descriptors("def", &["a", "b"]).unwrap();
        let token = json!(["first~", "second~"]);
        let definition = definition();
        let inputs = submission.find_inputs(&definition, &token).unwrap();
        let resolved: Vec<_> = inputs.iter().map(|(d, p)| (d.id(), *p)).collect();
        assert_eq!(resolved, [("a", "first~"), ("b", "second~")]);
    }

    #[test]
    fn missing_and_undefined_inputs() {
        let token = json!(["first~", "second~"]);
        let partial = PresentationSubmission::for_descriptors("def", &["a", "a"]).unwrap();
        assert_eq!(
            partial.find_inputs(&definition(), &token),
            Err(SubmissionError::DuplicateInput("a".into()))
        );

        let only_a = PresentationSubmission::for_descriptors("def", &["a"]).unwrap();
        assert_eq!(
            only_a.find_inputs(&definition(), &json!("first~")),
            Err(SubmissionError::MissingRequiredInput("b".into()))
        );

        let unknown = PresentationSubmission::for_descriptors("def", &["a", "z"]).unwrap();
        assert_eq!(
            unknown.find_inputs(&definition(), &token),
            Err(SubmissionError::UndefinedInputDescriptor("z".into()))
        );

        let other = PresentationSubmission::for_descriptors("other", &["a", "b"]).unwrap();
        assert_eq!(
            other.find_inputs(&definition(), &token),
            Err(SubmissionError::DefinitionMismatch("other".into()))
        );
    }

    #[test]
    fn path_must_match_exactly_one() {
        let wildcard = DescriptorMap::new("a", "vc+sd-jwt", JsonPath::parse("$[*]").unwrap());
        assert_eq!(
            wildcard.resolve(&json!(["x~", "y~"])),
            Err(SubmissionError::PathMismatch {
                id: "a".into(),
                found: 2
            })
        );
        let out_of_range = DescriptorMap::new("a", "vc+sd-jwt", JsonPath::parse("$[5]").unwrap());
        assert!(out_of_range.resolve(&json!(["x~"])).is_err());
        let root = DescriptorMap::new("a", "vc+sd-jwt", JsonPath::parse("$").unwrap());
        assert_eq!(
            root.resolve(&json!({"not": "a string"})),
            Err(SubmissionError::NotAPresentation("a".into()))
        );
    }

    #[test]
    fn nested_paths_are_rejected() {
        let entry: DescriptorMap = serde_json::from_value(json!({
            "id": "a",
            "format": "vc+sd-jwt",
            "path": "$",
            "path_nested": {"id": "a", "format": "vc+sd-jwt", "path": "$.credential"}
        }))
        .unwrap();
        assert_eq!(
            entry.resolve(&json!("first~")),
            Err(SubmissionError::NestingUnsupported(
                ClaimFormatDesignation::VcSdJwt
            ))
        );
    }
}
