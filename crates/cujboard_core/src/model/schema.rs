//! Collection schema registry.
//!
//! # Invariants
//! - Collection names are unique across `ALL_COLLECTIONS`.
//! - `ALL_COLLECTIONS` lists parents before children, which is the order
//!   snapshot restores write in.

/// One secondary index over a top-level record field.
///
/// Array-valued fields produce one index entry per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub field: &'static str,
    pub unique: bool,
}

impl IndexSpec {
    pub const fn lookup(field: &'static str) -> Self {
        Self {
            field,
            unique: false,
        }
    }

    pub const fn unique(field: &'static str) -> Self {
        Self {
            field,
            unique: true,
        }
    }
}

/// Shape of one named collection.
#[derive(Debug, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub indexes: &'static [IndexSpec],
    /// Prefix for generated keys. `None` means callers must supply keys.
    pub key_prefix: Option<&'static str>,
}

impl CollectionSchema {
    pub fn index(&self, field: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|index| index.field == field)
    }

    pub fn auto_generates_keys(&self) -> bool {
        self.key_prefix.is_some()
    }
}

pub static TEAMS: CollectionSchema = CollectionSchema {
    name: "teams",
    primary_key: "id",
    indexes: &[IndexSpec::unique("name")],
    key_prefix: Some("team"),
};

pub static SERVICES: CollectionSchema = CollectionSchema {
    name: "services",
    primary_key: "id",
    indexes: &[IndexSpec::lookup("teamId"), IndexSpec::lookup("name")],
    key_prefix: Some("svc"),
};

pub static CUJS: CollectionSchema = CollectionSchema {
    name: "cujs",
    primary_key: "id",
    indexes: &[
        IndexSpec::lookup("serviceId"),
        IndexSpec::lookup("status"),
        IndexSpec::lookup("authors"),
    ],
    key_prefix: Some("cuj"),
};

pub static SLOS: CollectionSchema = CollectionSchema {
    name: "slos",
    primary_key: "id",
    indexes: &[
        IndexSpec::lookup("cujId"),
        IndexSpec::lookup("serviceId"),
        IndexSpec::lookup("status"),
        IndexSpec::lookup("authors"),
    ],
    key_prefix: Some("slo"),
};

pub static AUDIT_LOG: CollectionSchema = CollectionSchema {
    name: "audit_log",
    primary_key: "id",
    indexes: &[IndexSpec::lookup("entityId"), IndexSpec::lookup("entityType")],
    key_prefix: Some("audit"),
};

/// Every collection known to this binary, parents first.
pub static ALL_COLLECTIONS: [&CollectionSchema; 5] =
    [&TEAMS, &SERVICES, &CUJS, &SLOS, &AUDIT_LOG];

/// Looks up a registered collection by name.
pub fn collection_by_name(name: &str) -> Option<&'static CollectionSchema> {
    ALL_COLLECTIONS
        .iter()
        .copied()
        .find(|schema| schema.name == name)
}
