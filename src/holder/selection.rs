use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::{
    input_descriptor::{ConstraintsField, InputDescriptor},
    presentation_definition::PresentationDefinition,
};

/// One requested field as shown to the user for approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRequest {
    pub descriptor_id: String,
    /// Position of the field within the descriptor's constraints.
    pub field_index: usize,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub optional: bool,
    pub approved: bool,
}

/// The fields, per input descriptor, the user agreed to disclose.
///
/// A descriptor with no approved field is declined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection(HashMap<String, BTreeSet<usize>>);

impl FieldSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists every field of `definition` for approval, none approved yet.
    pub fn requested_fields(definition: &PresentationDefinition) -> Vec<FieldRequest> {
        definition
            .input_descriptors()
            .iter()
            .flat_map(|descriptor| {
                descriptor
                    .constraints()
                    .fields()
                    .iter()
                    .enumerate()
                    .map(|(field_index, field)| FieldRequest {
                        descriptor_id: descriptor.id().to_owned(),
                        field_index,
                        label: field.label(),
                        purpose: field
                            .purpose()
                            .or(descriptor.purpose())
                            .cloned(),
                        optional: field.is_optional(),
                        approved: false,
                    })
            })
            .collect()
    }

    /// Approves every field of every descriptor.
    pub fn approve_all(definition: &PresentationDefinition) -> Self {
        let mut selection = Self::new();
        for descriptor in definition.input_descriptors() {
            for index in 0..descriptor.constraints().fields().len() {
                selection = selection.approve(descriptor.id(), index);
            }
        }
        selection
    }

    pub fn approve(mut self, descriptor_id: impl Into<String>, field_index: usize) -> Self {
        self.0
            .entry(descriptor_id.into())
            .or_default()
            .insert(field_index);
        self
    }

    /// Approves the fields whose `field.label()` is in `labels`, in every descriptor.
    pub fn approve_labels<S: AsRef<str>>(
        mut self,
        definition: &PresentationDefinition,
        labels: &[S],
    ) -> Self {
        for request in Self::requested_fields(definition) {
            if labels.iter().any(|l| l.as_ref() == request.label) {
                self = self.approve(request.descriptor_id, request.field_index);
            }
        }
        self
    }

    /// The approved fields of `descriptor`, in descriptor order.
    pub fn approved_fields<'a>(&self, descriptor: &'a InputDescriptor) -> Vec<&'a ConstraintsField> {
        let Some(approved) = self.0.get(descriptor.id()) else {
            return Vec::new();
        };
        descriptor
            .constraints()
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| approved.contains(i))
            .map(|(_, field)| field)
            .collect()
    }
}

impl FromIterator<FieldRequest> for FieldSelection {
    fn from_iter<T: IntoIterator<Item = FieldRequest>>(iter: T) -> Self {
        iter.into_iter()
            .filter(|request| request.approved)
            .fold(Self::new(), |selection, request| {
                selection.approve(request.descriptor_id, request.field_index)
            })
    }
}
