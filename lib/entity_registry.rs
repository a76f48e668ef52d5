use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read entity registry file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse entity registry: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid descriptor for entity type `{entity}`: {reason}")]
    InvalidDescriptor { entity: String, reason: String },
    #[error("duplicate entity type in registry: {0}")]
    DuplicateEntityType(String),
    #[error("entity registry contains no entity types")]
    Empty,
}

/// Storage class of an entity's identifying column.
///
/// Controls how keyset-scan cursor literals are rendered and compared:
/// `bigint` cursors compare numerically, `text` cursors as quoted strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum IdentifierKind {
    #[serde(rename = "bigint")]
    BigInt,
    #[serde(rename = "text")]
    Text,
}

fn default_id_kind() -> IdentifierKind {
    IdentifierKind::BigInt
}

/// One enumerable entity type: where its instances live and which column
/// identifies them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    pub id_column: String,
    #[serde(default = "default_id_kind")]
    pub id_kind: IdentifierKind,
}

impl EntityDescriptor {
    fn validate(&self) -> Result<(), RegistryError> {
        for (field, value) in [
            ("name", self.name.as_str()),
            ("table", self.table.as_str()),
            ("id_column", self.id_column.as_str()),
        ] {
            if !is_sql_identifier(value) {
                return Err(RegistryError::InvalidDescriptor {
                    entity: self.name.clone(),
                    reason: format!("`{field}` is not a plain SQL identifier: `{value}`"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    entities: Vec<EntityDescriptor>,
}

/// The bounded, known set of entity types this worker can enumerate.
///
/// Loaded once at startup; lookups by entity type name drive both the
/// identifying-property resolution at session init and the keyset scans
/// during batch processing.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    by_name: HashMap<String, EntityDescriptor>,
}

impl EntityRegistry {
    pub fn from_json_str(raw: &str) -> Result<Self, RegistryError> {
        let document: RegistryDocument = serde_json::from_str(raw)?;
        if document.entities.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut by_name = HashMap::with_capacity(document.entities.len());
        for descriptor in document.entities {
            descriptor.validate()?;
            if by_name
                .insert(descriptor.name.clone(), descriptor.clone())
                .is_some()
            {
                return Err(RegistryError::DuplicateEntityType(descriptor.name));
            }
        }

        Ok(Self { by_name })
    }

    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityDescriptor> {
        self.by_name.get(entity_type)
    }

    /// Descriptors in stable name order, for status listings and logs.
    pub fn descriptors(&self) -> Vec<&EntityDescriptor> {
        let mut all: Vec<&EntityDescriptor> = self.by_name.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*` only. Registry values are interpolated
/// into SQL, so anything fancier is rejected up front.
pub(crate) fn is_sql_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
