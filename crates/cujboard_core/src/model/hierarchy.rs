//! Team and service records, the non-reviewable top of the hierarchy.

use super::entity::{require_text, DependentRef, Entity, ParentRef};
use super::lifecycle::Provenance;
use super::schema::{CollectionSchema, CUJS, SERVICES, SLOS, TEAMS};
use serde::{Deserialize, Serialize};

/// Editable team fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamFields {
    /// Unique across teams.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_channel: Option<String>,
}

/// Root of the ownership hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    #[serde(flatten)]
    pub fields: TeamFields,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// Editable service fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceFields {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// A service owned by exactly one team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(flatten)]
    pub fields: ServiceFields,
    #[serde(flatten)]
    pub provenance: Provenance,
}

static TEAM_DEPENDENTS: [DependentRef; 1] = [DependentRef {
    schema: &SERVICES,
    foreign_key: "teamId",
    copied_fields: &[],
}];

static SERVICE_DEPENDENTS: [DependentRef; 2] = [
    DependentRef {
        schema: &CUJS,
        foreign_key: "serviceId",
        copied_fields: &[],
    },
    DependentRef {
        schema: &SLOS,
        foreign_key: "serviceId",
        copied_fields: &[],
    },
];

impl Entity for Team {
    type Fields = TeamFields;
    const KIND: &'static str = "team";

    fn schema() -> &'static CollectionSchema {
        &TEAMS
    }

    fn dependents() -> &'static [DependentRef] {
        &TEAM_DEPENDENTS
    }

    fn build(id: String, fields: TeamFields, provenance: Provenance) -> Self {
        Self {
            id,
            fields,
            provenance,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn fields(&self) -> &TeamFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut TeamFields {
        &mut self.fields
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn provenance_mut(&mut self) -> &mut Provenance {
        &mut self.provenance
    }

    fn parents(&self) -> Vec<ParentRef<'_>> {
        Vec::new()
    }

    fn validate(&self) -> Result<(), String> {
        require_text("name", &self.fields.name)
    }
}

impl Entity for Service {
    type Fields = ServiceFields;
    const KIND: &'static str = "service";

    fn schema() -> &'static CollectionSchema {
        &SERVICES
    }

    fn dependents() -> &'static [DependentRef] {
        &SERVICE_DEPENDENTS
    }

    fn build(id: String, fields: ServiceFields, provenance: Provenance) -> Self {
        Self {
            id,
            fields,
            provenance,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn fields(&self) -> &ServiceFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut ServiceFields {
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
            schema: &TEAMS,
            key: &self.fields.team_id,
            expect: None,
        }]
    }

    fn validate(&self) -> Result<(), String> {
        require_text("name", &self.fields.name)?;
        require_text("teamId", &self.fields.team_id)
    }
}
