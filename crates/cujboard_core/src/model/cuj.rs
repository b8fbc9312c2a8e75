//! Critical user journey records.

use super::entity::{require_text, DependentRef, Entity, ParentRef, Reviewable};
use super::lifecycle::{Provenance, ReviewState};
use super::schema::{CollectionSchema, CUJS, SERVICES, SLOS};
use serde::{Deserialize, Serialize};

/// Editable CUJ fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CujFields {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub service_id: String,
    /// Ordered journey steps as the user experiences them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// A reviewable user-facing flow owned by one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cuj {
    pub id: String,
    #[serde(flatten)]
    pub fields: CujFields,
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(flatten)]
    pub review: ReviewState,
}

static CUJ_DEPENDENTS: [DependentRef; 1] = [DependentRef {
    schema: &SLOS,
    foreign_key: "cujId",
    copied_fields: &["serviceId"],
}];

impl Entity for Cuj {
    type Fields = CujFields;
    const KIND: &'static str = "cuj";

    fn schema() -> &'static CollectionSchema {
        &CUJS
    }

    fn dependents() -> &'static [DependentRef] {
        &CUJ_DEPENDENTS
    }

    fn build(id: String, fields: CujFields, provenance: Provenance) -> Self {
        Self {
            id,
            fields,
            provenance,
            review: ReviewState::default(),
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn fields(&self) -> &CujFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut CujFields {
        &mut self.fields
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn provenance_mut(&mut self) -> &mut Provenance {
        &mut self.provenance
    }

    fn parents(&self) -> Vec<ParentRef<'_>> {
        vec![ParentRef {
            schema: &SERVICES,
            key: &self.fields.service_id,
            expect: None,
        }]
    }

    fn validate(&self) -> Result<(), String> {
        require_text("name", &self.fields.name)?;
        require_text("serviceId", &self.fields.service_id)?;
        if self.fields.steps.iter().any(|step| step.trim().is_empty()) {
            return Err("`steps` must not contain blank entries".to_string());
        }
        Ok(())
    }

    fn review(&self) -> Option<&ReviewState> {
        Some(&self.review)
    }

    fn review_mut(&mut self) -> Option<&mut ReviewState> {
        Some(&mut self.review)
    }
}

impl Reviewable for Cuj {}
