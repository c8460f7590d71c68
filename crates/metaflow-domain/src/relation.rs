use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDeletePolicy {
    Cascade,
    SetNull,
    Restrict,
    Detach,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinTable {
    pub table_name: String,
    pub source_column: String,
    pub target_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    pub source_entity: String,
    pub target_entity: String,
    /// Foreign-key column on the target table, for 1-N / 1-1 relations.
    #[serde(default)]
    pub target_foreign_key: Option<String>,
    /// Join table description, for N-N relations.
    #[serde(default)]
    pub join_table: Option<JoinTable>,
    pub on_delete: OnDeletePolicy,
}

impl RelationDescriptor {
    pub fn is_many_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::ManyToMany)
    }
}
