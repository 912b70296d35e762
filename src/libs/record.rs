use crate::libs::driver::Row;
use crate::libs::error::{CallerError, OrmResult, StorageError};
use crate::libs::query_builder::Attributes;
use crate::libs::registry::RecordTypeDefinition;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// One row of a compiled record type, plus the set of attributes changed
/// since it was last persisted.
#[derive(Clone, PartialEq)]
pub struct RecordInstance {
    definition: Arc<RecordTypeDefinition>,
    attributes: Attributes,
    dirty: BTreeSet<String>,
}

impl RecordInstance {
    /// Builds a record from caller data.
    ///
    /// Data carrying the primary key describes an existing row and starts
    /// clean. Otherwise every provided attribute is dirty, and declared
    /// defaults fill the fields the caller left out.
    pub fn new(definition: Arc<RecordTypeDefinition>, data: Attributes) -> OrmResult<Self> {
        for field in data.keys() {
            definition.require_field(field)?;
        }

        let existing = data
            .get(definition.primary_key())
            .is_some_and(|v| !v.is_null());

        let dirty = if existing {
            BTreeSet::new()
        } else {
            data.keys()
                .filter(|k| k.as_str() != definition.primary_key())
                .cloned()
                .collect()
        };

        let mut attributes = data;
        if !existing {
            for field in definition.fields() {
                if let Some(default) = &field.default {
                    attributes
                        .entry(field.name.clone())
                        .or_insert_with(|| default.clone());
                }
            }
        }

        Ok(Self {
            definition,
            attributes,
            dirty,
        })
    }

    /// Builds a clean record from a stored row. Columns the definition does
    /// not declare are dropped. With `require_key`, a row without a primary
    /// key is rejected; projected rows may legitimately lack it.
    pub(crate) fn from_row(
        definition: Arc<RecordTypeDefinition>,
        row: Row,
        require_key: bool,
    ) -> Result<Self, StorageError> {
        let has_key = row
            .get(definition.primary_key())
            .is_some_and(|v| !v.is_null());
        if require_key && !has_key {
            return Err(StorageError::InvalidRow {
                record: definition.name().to_string(),
                reason: format!("missing primary key `{}`", definition.primary_key()),
            });
        }

        let attributes = row
            .into_iter()
            .filter(|(k, _)| definition.has_field(k))
            .collect();

        Ok(Self {
            definition,
            attributes,
            dirty: BTreeSet::new(),
        })
    }

    pub fn definition(&self) -> &Arc<RecordTypeDefinition> {
        &self.definition
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field).filter(|v| !v.is_null())
    }

    /// Assigns a mapped column and marks it dirty. The primary key and
    /// undeclared names are rejected.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> OrmResult<()> {
        if field == self.definition.primary_key() {
            return Err(CallerError::PrimaryKeyImmutable {
                record: self.definition.name().to_string(),
                field: field.to_string(),
            }
            .into());
        }
        self.definition.require_field(field)?;

        self.attributes.insert(field.to_string(), value.into());
        self.dirty.insert(field.to_string());
        Ok(())
    }

    pub fn id(&self) -> Option<i64> {
        self.get(self.definition.primary_key()).and_then(integer_value)
    }

    pub fn is_new(&self) -> bool {
        self.get(self.definition.primary_key()).is_none()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn dirty(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub(crate) fn dirty_attributes(&self) -> Attributes {
        self.dirty
            .iter()
            .map(|k| {
                let value = self.attributes.get(k).cloned().unwrap_or(Value::Null);
                (k.clone(), value)
            })
            .collect()
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    pub(crate) fn assign_primary_key(&mut self, id: i64) {
        let pk = self.definition.primary_key().to_string();
        self.attributes.insert(pk, Value::from(id));
    }
}

/// Integers and numeric strings both identify rows.
pub(crate) fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl fmt::Debug for RecordInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {:?}>", self.definition.name(), self.attributes)
    }
}

impl Serialize for RecordInstance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.attributes.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::registry::RecordRegistry;
    use crate::libs::schema::{FieldKind, FieldSpec, TypeDeclaration};
    use serde_json::json;

    fn widget() -> Arc<RecordTypeDefinition> {
        RecordRegistry::new().compile(
            TypeDeclaration::new("Widget")
                .field("name", FieldSpec::new(FieldKind::Text))
                .field("stock", FieldSpec::new(FieldKind::Integer).default_value(0)),
        )
    }

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn new_record_marks_provided_fields_dirty() {
        let record = RecordInstance::new(widget(), attrs(json!({"name": "Nail"}))).unwrap();

        assert!(record.is_new());
        assert_eq!(record.dirty().iter().collect::<Vec<_>>(), vec!["name"]);
        assert_eq!(record.get("stock"), Some(&json!(0)));
        assert_eq!(record.dirty_attributes(), attrs(json!({"name": "Nail"})));
    }

    #[test]
    fn data_with_primary_key_starts_clean() {
        let record = RecordInstance::new(widget(), attrs(json!({"id": 5, "name": "Gear"}))).unwrap();

        assert!(!record.is_dirty());
        assert_eq!(record.id(), Some(5));
        assert_eq!(record.get("stock"), None);
    }

    #[test]
    fn set_tracks_mapped_columns() {
        let mut record = RecordInstance::new(widget(), attrs(json!({"id": 5}))).unwrap();
        record.set("name", "Cog").unwrap();

        assert_eq!(record.get("name"), Some(&json!("Cog")));
        assert!(record.dirty().contains("name"));
    }

    #[test]
    fn set_rejects_primary_key_and_unknown_fields() {
        let mut record = RecordInstance::new(widget(), Attributes::new()).unwrap();

        assert!(record.set("id", 9).is_err());
        assert!(record.set("colour", "red").is_err());
        assert!(record.is_new());
        assert!(!record.is_dirty());
    }

    #[test]
    fn unknown_fields_in_data_are_rejected() {
        assert!(RecordInstance::new(widget(), attrs(json!({"colour": "red"}))).is_err());
    }

    #[test]
    fn from_row_requires_primary_key() {
        assert!(RecordInstance::from_row(widget(), attrs(json!({"name": "x"})), true).is_err());
        assert!(RecordInstance::from_row(widget(), attrs(json!({"name": "x"})), false).is_ok());

        let record =
            RecordInstance::from_row(widget(), attrs(json!({"id": 1, "name": "x", "extra": 1})), true)
                .unwrap();
        assert!(!record.attributes().contains_key("extra"));
        assert!(!record.is_dirty());
    }

    #[test]
    fn serializes_as_attribute_map() {
        let record = RecordInstance::new(widget(), attrs(json!({"id": 1, "name": "Gear"}))).unwrap();
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": 1, "name": "Gear"})
        );
    }
}
