//! Selects, for each input descriptor of a presentation definition, one
//! credential and the disclosures that satisfy the approved fields.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::selection::FieldSelection;
use crate::core::{
    input_descriptor::{ClaimLocation, InputDescriptor},
    presentation_definition::PresentationDefinition,
    presentation_submission::{PresentationSubmission, SubmissionError},
    response::parameters::VpToken,
    sd_jwt::{CryptoError, DecodedSdJwt, KeyBinding, SdJwt},
};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MatchError {
    /// No credential satisfies the approved fields of this descriptor.
    #[error("no credential satisfies input descriptor `{0}`")]
    NoSatisfyingCredential(String),
    /// Every descriptor was declined; there is nothing to present.
    #[error("no field of presentation definition `{0}` was approved")]
    NothingApproved(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// The credential chosen for one input descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub descriptor_id: String,
    /// Index of the credential in the list given to [match_definition].
    pub credential_index: usize,
    pub credential: SdJwt,
    /// Encoded disclosures to reveal, in the order the fields matched them.
    pub disclosures: Vec<String>,
}

impl DescriptorMatch {
    /// The presentation fragment for this descriptor: the issuer-signed JWT
    /// followed by the selected disclosures.
    ///
    /// `key_binding` is only attached when the credential is bound to a
    /// holder key through `cnf`.
    pub fn present(&self, key_binding: Option<&KeyBinding<'_>>) -> Result<String, CryptoError> {
        let bound = self.credential.payload_unverified()?.contains_key("cnf");
        self.credential
            .present(&self.disclosures, key_binding.filter(|_| bound))
    }
}

/// The outcome of matching a presentation definition, ready to serialize into
/// a `vp_token` and its presentation submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPresentation {
    pub definition_id: String,
    pub matches: Vec<DescriptorMatch>,
}

impl MatchedPresentation {
    /// Builds the `vp_token` and the presentation submission describing it.
    ///
    /// With one match the token is the bare fragment at path `$`; with
    /// several it is an array addressed by `$[i]`, in descriptor order.
    pub fn into_vp_token(
        self,
        key_binding: Option<&KeyBinding<'_>>,
    ) -> Result<(VpToken, PresentationSubmission), MatchError> {
        let fragments = self
            .matches
            .iter()
            .map(|m| m.present(key_binding))
            .collect::<Result<Vec<_>, _>>()?;
        let descriptor_ids: Vec<&str> = self
            .matches
            .iter()
            .map(|m| m.descriptor_id.as_str())
            .collect();
        let submission =
            PresentationSubmission::for_descriptors(self.definition_id.as_str(), &descriptor_ids)?;
        Ok((VpToken::from_presentations(fragments), submission))
    }
}

/// Running candidate set: credential index to the disclosures matched so far.
type Candidates = BTreeMap<usize, Vec<String>>;

/// Matches the approved fields of every input descriptor against `credentials`.
///
/// Ties between credentials satisfying a descriptor are broken by taking the
/// lowest index in `credentials`. A descriptor without approved fields is
/// declined and skipped; a descriptor with approved fields that no credential
/// satisfies fails the whole match.
pub fn match_definition(
    definition: &PresentationDefinition,
    selection: &FieldSelection,
    credentials: &[SdJwt],
) -> Result<MatchedPresentation, MatchError> {
    let decoded: Vec<Option<DecodedSdJwt>> = credentials
        .iter()
        .enumerate()
        .map(|(i, credential)| match credential.decode() {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Skipping undecodable credential at index {i}: {e}");
                None
            }
        })
        .collect();

    let mut matches = Vec::new();
    for descriptor in definition.input_descriptors() {
        let Some(candidates) = match_descriptor(descriptor, selection, &decoded) else {
            debug!(descriptor = descriptor.id(), "Input descriptor declined");
            continue;
        };
        let Some((credential_index, disclosures)) = candidates.into_iter().next() else {
            info!(descriptor = descriptor.id(), "No credential satisfies input descriptor");
            return Err(MatchError::NoSatisfyingCredential(descriptor.id().to_owned()));
        };
        debug!(
            descriptor = descriptor.id(),
            credential_index,
            disclosures = disclosures.len(),
            "Matched input descriptor"
        );
        matches.push(DescriptorMatch {
            descriptor_id: descriptor.id().to_owned(),
            credential_index,
            credential: credentials[credential_index].clone(),
            disclosures,
        });
    }

    if matches.is_empty() {
        return Err(MatchError::NothingApproved(definition.id().clone()));
    }

    Ok(MatchedPresentation {
        definition_id: definition.id().clone(),
        matches,
    })
}

/// Returns `None` when no field of the descriptor is approved.
fn match_descriptor(
    descriptor: &InputDescriptor,
    selection: &FieldSelection,
    credentials: &[Option<DecodedSdJwt>],
) -> Option<Candidates> {
    let fields = selection.approved_fields(descriptor);
    if fields.is_empty() {
        return None;
    }
    if !descriptor.admits_sd_jwt() {
        warn!(
            descriptor = descriptor.id(),
            "Input descriptor does not accept SD-JWT credentials"
        );
        return Some(Candidates::new());
    }

    // Every decodable credential starts as a candidate. Required fields
    // narrow the set; optional fields only contribute disclosures.
    let mut candidates: Candidates = credentials
        .iter()
        .enumerate()
        .filter(|(_, credential)| credential.is_some())
        .map(|(i, _)| (i, Vec::new()))
        .collect();
    for field in fields {
        let found: BTreeMap<usize, ClaimLocation> = credentials
            .iter()
            .enumerate()
            .filter_map(|(i, credential)| {
                credential
                    .as_ref()
                    .and_then(|c| field.locate(c))
                    .map(|location| (i, location))
            })
            .collect();

        if field.is_required() {
            candidates.retain(|i, _| found.contains_key(i));
        }
        for (i, location) in found {
            if let (Some(disclosures), ClaimLocation::Disclosure(encoded)) =
                (candidates.get_mut(&i), location)
            {
                if !disclosures.contains(&encoded) {
                    disclosures.push(encoded);
                }
            }
        }

        if candidates.is_empty() {
            break;
        }
    }
    Some(candidates)
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::SigningKey;
    use serde_json::{json, Map, Value as Json};

    use super::*;
    use crate::core::sd_jwt::{construct, verify, IssuancePolicy, VerifyOptions};

    fn issue(key: &SigningKey, disclosable: Json, payload: Json) -> SdJwt {
        construct(
            disclosable.as_object().unwrap(),
            payload.as_object().unwrap(),
            key,
            None,
            &IssuancePolicy::default(),
        )
        .unwrap()
    }

    fn definition(value: Json) -> PresentationDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn disclosure_of(credential: &SdJwt, name: &str) -> String {
        credential
            .disclosures()
            .iter()
            .find(|d| d.claim_name() == name)
            .map(|d| d.encoded().to_owned())
            .unwrap()
    }

    #[test]
    fn single_field_with_filter() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let credential = issue(
            &key,
            json!({"is_over_18": true, "given_name": "Bob"}),
            json!({"vct": "Identity"}),
        );
        let definition = definition(json!({
            "id": "age",
            "input_descriptors": [{
                "id": "over_18",
                "constraints": {"fields": [{
                    "path": ["$.is_over_18"],
                    "filter": {"type": "boolean", "const": true}
                }]}
            }]
        }));

        let matched = match_definition(
            &definition,
            &FieldSelection::approve_all(&definition),
            std::slice::from_ref(&credential),
        )
        .unwrap();
        assert_eq!(matched.matches.len(), 1);
        assert_eq!(
            matched.matches[0].disclosures,
            vec![disclosure_of(&credential, "is_over_18")]
        );
    }

    #[test]
    fn optional_field_does_not_disqualify() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let credential = issue(&key, json!({"dob": "1970-01-01"}), json!({}));
        let definition = definition(json!({
            "id": "identity",
            "input_descriptors": [{
                "id": "person",
                "constraints": {"fields": [
                    {"path": ["$.dob"]},
                    {"path": ["$.nickname"], "optional": true}
                ]}
            }]
        }));

        let matched = match_definition(
            &definition,
            &FieldSelection::approve_all(&definition),
            &[credential.clone()],
        )
        .unwrap();
        assert_eq!(matched.matches[0].credential_index, 0);
        assert_eq!(
            matched.matches[0].disclosures,
            vec![disclosure_of(&credential, "dob")]
        );
    }

    #[test]
    fn optional_field_listed_first() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let definition = definition(json!({
            "id": "age",
            "input_descriptors": [{
                "id": "identity",
                "constraints": {"fields": [
                    {"path": ["$.given_name"], "optional": true},
                    {"path": ["$.dob"]}
                ]}
            }]
        }));
        let selection = FieldSelection::approve_all(&definition);

        let dob_only = issue(&key, json!({"dob": "1970-01-01"}), json!({}));
        let matched =
            match_definition(&definition, &selection, std::slice::from_ref(&dob_only)).unwrap();
        assert_eq!(matched.matches[0].credential_index, 0);
        assert_eq!(
            matched.matches[0].disclosures,
            vec![disclosure_of(&dob_only, "dob")]
        );

        let name_only = issue(&key, json!({"given_name": "Alice"}), json!({}));
        let matched = match_definition(&definition, &selection, &[name_only, dob_only.clone()])
            .unwrap();
        assert_eq!(matched.matches[0].credential_index, 1);
        assert_eq!(
            matched.matches[0].disclosures,
            vec![disclosure_of(&dob_only, "dob")]
        );
    }

    #[test]
    fn mandatory_field_narrows_candidates() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let partial = issue(&key, json!({"given_name": "Alice"}), json!({}));
        let full = issue(
            &key,
            json!({"given_name": "Bob", "family_name": "Smith"}),
            json!({}),
        );
        let definition = definition(json!({
            "id": "identity",
            "input_descriptors": [{
                "id": "person",
                "constraints": {"fields": [
                    {"path": ["$.given_name"]},
                    {"path": ["$.family_name"]}
                ]}
            }]
        }));

        let matched = match_definition(
            &definition,
            &FieldSelection::approve_all(&definition),
            &[partial, full.clone()],
        )
        .unwrap();
        let chosen = &matched.matches[0];
        assert_eq!(chosen.credential_index, 1);
        assert_eq!(
            chosen.disclosures,
            vec![
                disclosure_of(&full, "given_name"),
                disclosure_of(&full, "family_name")
            ]
        );
    }

    #[test]
    fn payload_match_needs_no_disclosure() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let credential = issue(&key, json!({"dob": "1970-01-01"}), json!({"vct": "Identity"}));
        let definition = definition(json!({
            "id": "type",
            "input_descriptors": [{
                "id": "identity",
                "constraints": {"fields": [
                    {"path": ["$.vct"], "filter": {"const": "Identity"}}
                ]}
            }]
        }));
        let matched = match_definition(
            &definition,
            &FieldSelection::approve_all(&definition),
            &[credential],
        )
        .unwrap();
        assert!(matched.matches[0].disclosures.is_empty());
    }

    #[test]
    fn exhaustion_fails() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let credential = issue(&key, json!({"given_name": "Bob"}), json!({}));
        let definition = definition(json!({
            "id": "age",
            "input_descriptors": [{
                "id": "over_18",
                "constraints": {"fields": [{"path": ["$.is_over_18"]}]}
            }]
        }));
        assert_eq!(
            match_definition(
                &definition,
                &FieldSelection::approve_all(&definition),
                &[credential.clone()]
            ),
            Err(MatchError::NoSatisfyingCredential("over_18".into()))
        );
        assert_eq!(
            match_definition(&definition, &FieldSelection::new(), &[credential]),
            Err(MatchError::NothingApproved("age".into()))
        );
    }

    #[test]
    fn several_descriptors_address_array_entries() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let identity = issue(&key, json!({"given_name": "Bob"}), json!({"vct": "Identity"}));
        let license = issue(&key, json!({"license_class": "B"}), json!({"vct": "License"}));
        let definition = definition(json!({
            "id": "rental",
            "input_descriptors": [
                {"id": "license", "constraints": {"fields": [{"path": ["$.license_class"]}]}},
                {"id": "identity", "constraints": {"fields": [{"path": ["$.given_name"]}]}}
            ]
        }));

        let matched = match_definition(
            &definition,
            &FieldSelection::approve_all(&definition),
            &[identity, license],
        )
        .unwrap();
        let (vp_token, submission) = matched.into_vp_token(None).unwrap();

        let token = Json::from(&vp_token);
        let inputs = submission.find_inputs(&definition, &token).unwrap();
        let resolver = key.verifying_key().clone();
        let license_claims: Map<String, Json> =
            verify(inputs[0].1, &resolver, &VerifyOptions::default()).unwrap();
        assert_eq!(license_claims["license_class"], "B");
        assert!(!license_claims.contains_key("given_name"));
        let identity_claims = verify(inputs[1].1, &resolver, &VerifyOptions::default()).unwrap();
        assert_eq!(identity_claims["given_name"], "Bob");
        assert_eq!(
            serde_json::to_value(&submission).unwrap()["descriptor_map"][1]["path"],
            "$[1]"
        );
    }

    #[test]
    fn declined_descriptor_is_skipped() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let credential = issue(&key, json!({"given_name": "Bob"}), json!({}));
        let definition = definition(json!({
            "id": "two",
            "input_descriptors": [
                {"id": "a", "constraints": {"fields": [{"path": ["$.given_name"]}]}},
                {"id": "b", "constraints": {"fields": [{"path": ["$.dob"]}]}}
            ]
        }));
        let matched = match_definition(
            &definition,
            &FieldSelection::new().approve("a", 0),
            &[credential],
        )
        .unwrap();
        let (vp_token, submission) = matched.into_vp_token(None).unwrap();
        assert!(matches!(vp_token, VpToken::Single(_)));
        assert_eq!(
            serde_json::to_value(&submission).unwrap()["descriptor_map"][0]["path"],
            "$"
        );
    }
}
