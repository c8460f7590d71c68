use serde::{Deserialize, Serialize};

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    DateTime,
    Json,
    File,
    Enum,
}

/// When an auto-fill field is stamped by the write pipeline rather than
/// accepted from user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoFillPolicy {
    #[default]
    None,
    OnCreate,
    OnUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub nullable: bool,
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub auto_fill: AutoFillPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub table_name: String,
    pub primary_key: String,
    #[serde(default)]
    pub pk_generation: PkGeneration,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub soft_delete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PkGeneration {
    #[default]
    Database,
    Application,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Validates the invariants from §3: primary-key field present; a
    /// soft-delete entity has a `deleted_at` column.
    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.has_field(&self.primary_key) {
            return Err(DomainError::MissingPrimaryKey(self.name.clone()));
        }
        if self.soft_delete && !self.has_field("deleted_at") {
            return Err(DomainError::MissingDeletedAt(self.name.clone()));
        }
        Ok(())
    }
}
