//! Service level objective records.
//!
//! The indicator definition (metric source, name, description) is embedded
//! inline rather than stored as a separate record.

use super::entity::{require_text, DependentRef, Entity, ParentRef, Reviewable};
use super::lifecycle::{Provenance, ReviewState};
use super::schema::{CollectionSchema, CUJS, SERVICES, SLOS};
use serde::{Deserialize, Serialize};

/// Editable SLO fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SloFields {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cuj_id: String,
    /// Denormalized from the parent CUJ; must match its `serviceId`.
    pub service_id: String,
    /// Monitoring system the indicator is read from.
    pub metric_source: String,
    pub metric_name: String,
    #[serde(default)]
    pub metric_description: String,
    /// Objective as a percentage in `(0, 100]`.
    pub target: f64,
    /// Rolling evaluation window.
    pub window_days: u32,
}

/// A reviewable objective attached to one CUJ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slo {
    pub id: String,
    #[serde(flatten)]
    pub fields: SloFields,
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(flatten)]
    pub review: ReviewState,
}

impl Entity for Slo {
    type Fields = SloFields;
    const KIND: &'static str = "slo";

    fn schema() -> &'static CollectionSchema {
        &SLOS
    }

    fn dependents() -> &'static [DependentRef] {
        &[]
    }

    fn build(id: String, fields: SloFields, provenance: Provenance) -> Self {
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

    fn fields(&self) -> &SloFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut SloFields {
        &mut self.fields
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn provenance_mut(&mut self) -> &mut Provenance {
        &mut self.provenance
    }

    fn parents(&self) -> Vec<ParentRef<'_>> {
        vec![
            ParentRef {
                schema: &CUJS,
                key: &self.fields.cuj_id,
                expect: Some(("serviceId", &self.fields.service_id)),
            },
            ParentRef {
                schema: &SERVICES,
                key: &self.fields.service_id,
                expect: None,
            },
        ]
    }

    fn validate(&self) -> Result<(), String> {
        require_text("name", &self.fields.name)?;
        require_text("cujId", &self.fields.cuj_id)?;
        require_text("serviceId", &self.fields.service_id)?;
        require_text("metricSource", &self.fields.metric_source)?;
        require_text("metricName", &self.fields.metric_name)?;
        if !(self.fields.target > 0.0 && self.fields.target <= 100.0) {
            return Err(format!(
                "`target` must be within (0, 100], got {}",
                self.fields.target
            ));
        }
        if self.fields.window_days == 0 {
            return Err("`windowDays` must be greater than zero".to_string());
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

impl Reviewable for Slo {}

#[cfg(test)]
mod tests {
    use super::{Slo, SloFields};
    use crate::model::entity::Entity;
    use crate::model::lifecycle::Provenance;

    fn fields() -> SloFields {
        SloFields {
            name: "checkout availability".into(),
            cuj_id: "cuj-1".into(),
            service_id: "svc-1".into(),
            metric_source: "prometheus".into(),
            metric_name: "checkout_success_ratio".into(),
            target: 99.9,
            window_days: 28,
            ..SloFields::default()
        }
    }

    #[test]
    fn target_must_be_a_percentage() {
        let mut slo = Slo::build("slo-1".into(), fields(), Provenance::new("carol", 1));
        assert!(slo.validate().is_ok());
        slo.fields.target = 0.0;
        assert!(slo.validate().is_err());
        slo.fields.target = 100.5;
        assert!(slo.validate().is_err());
    }

    #[test]
    fn serializes_flat_camel_case_document() {
        let slo = Slo::build("slo-1".into(), fields(), Provenance::new("carol", 1));
        let value = serde_json::to_value(&slo).unwrap();
        assert_eq!(value["cujId"], "cuj-1");
        assert_eq!(value["metricSource"], "prometheus");
        assert_eq!(value["status"], "draft");
        assert_eq!(value["modifiedBy"], "carol");
        assert!(value["history"].as_array().unwrap().is_empty());
    }
}
