use crate::libs::error::{CallerError, OrmResult};
use crate::libs::schema::{FieldSpec, KeyRole, RelationSpec, TypeDeclaration};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// A compiled record type. Immutable once stored in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTypeDefinition {
    name: String,
    table: String,
    ordering: String,
    primary_key: String,
    fields: Vec<FieldSpec>,
    relations: BTreeMap<String, RelationSpec>,
    column_aliases: Vec<String>,
}

impl RecordTypeDefinition {
    fn build(decl: TypeDeclaration) -> Self {
        let TypeDeclaration {
            name,
            table,
            ordering,
            mut fields,
            relations,
        } = decl;

        let table = table.unwrap_or_else(|| name.to_lowercase());

        // without an explicit primary key, a declared `id` column takes the
        // role; only when there is none is one synthesized
        let primary_key = match fields.iter().find(|f| f.is_primary()) {
            Some(field) => field.name.clone(),
            None => match fields.iter_mut().find(|f| f.name == "id") {
                Some(field) => {
                    field.key_role = KeyRole::Primary;
                    field.name.clone()
                }
                None => {
                    let id = FieldSpec::implicit_primary_key();
                    let pk = id.name.clone();
                    fields.insert(0, id);
                    pk
                }
            },
        };

        let ordering = ordering.unwrap_or_else(|| format!("{primary_key} ASC"));

        let column_aliases = fields
            .iter()
            .map(|f| format!("{table}.{col} AS \"{name}.{col}\"", col = f.name))
            .collect();

        Self {
            name,
            table,
            ordering,
            primary_key,
            fields,
            relations: relations.into_iter().collect(),
            column_aliases,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn ordering(&self) -> &str {
        &self.ordering
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationSpec> {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> OrmResult<&RelationSpec> {
        self.relations.get(name).ok_or_else(|| {
            CallerError::UnknownRelation {
                record: self.name.clone(),
                relation: name.to_string(),
            }
            .into()
        })
    }

    /// `table.column AS "Type.column"` for every field, in declaration order.
    pub fn column_aliases(&self) -> &[String] {
        &self.column_aliases
    }

    pub(crate) fn require_field(&self, name: &str) -> Result<&FieldSpec, CallerError> {
        self.field(name).ok_or_else(|| CallerError::UnknownField {
            record: self.name.clone(),
            field: name.to_string(),
        })
    }
}

///
/// RecordRegistry
///
/// Process-wide cache of compiled definitions keyed by type name. The first
/// compilation of a name wins; entries are never evicted.
///

#[derive(Debug, Default)]
pub struct RecordRegistry {
    types: RwLock<HashMap<String, Arc<RecordTypeDefinition>>>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `decl` unless a type of the same name is already stored, in
    /// which case the stored definition is returned and `decl` is ignored.
    pub fn compile(&self, decl: TypeDeclaration) -> Arc<RecordTypeDefinition> {
        if let Some(existing) = self.get(&decl.name) {
            return existing;
        }

        let mut types = self.types.write().unwrap_or_else(PoisonError::into_inner);

        // check again under the write lock; another caller may have won
        if let Some(existing) = types.get(&decl.name) {
            return Arc::clone(existing);
        }

        let definition = Arc::new(RecordTypeDefinition::build(decl));
        debug!(
            "event=record_type_compile type={} table={} fields={} relations={}",
            definition.name(),
            definition.table(),
            definition.fields().len(),
            definition.relations().len()
        );
        types.insert(definition.name().to_string(), Arc::clone(&definition));

        definition
    }

    pub fn get(&self, name: &str) -> Option<Arc<RecordTypeDefinition>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn require(&self, name: &str) -> OrmResult<Arc<RecordTypeDefinition>> {
        self.get(name)
            .ok_or_else(|| CallerError::UnknownRecordType(name.to_string()).into())
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::schema::{FieldKind, RelationSpec};
    use std::thread;

    fn widget(field: &str) -> TypeDeclaration {
        TypeDeclaration::new("Widget").field(field, FieldSpec::new(FieldKind::Text))
    }

    #[test]
    fn defaults_table_ordering_and_primary_key() {
        let registry = RecordRegistry::new();
        let def = registry.compile(widget("name"));

        assert_eq!(def.table(), "widget");
        assert_eq!(def.ordering(), "id ASC");
        assert_eq!(def.primary_key(), "id");

        let id = def.field("id").unwrap();
        assert_eq!(id.kind, FieldKind::Integer);
        assert!(id.auto_increment);
        assert!(!id.nullable);
    }

    #[test]
    fn declared_primary_key_is_kept() {
        let registry = RecordRegistry::new();
        let def = registry.compile(
            TypeDeclaration::new("Isbn")
                .field("code", FieldSpec::new(FieldKind::Integer).primary())
                .field("title", FieldSpec::new(FieldKind::Text)),
        );

        assert_eq!(def.primary_key(), "code");
        assert_eq!(def.ordering(), "code ASC");
        assert!(!def.has_field("id"));
    }

    #[test]
    fn declared_id_column_becomes_the_primary_key() {
        let registry = RecordRegistry::new();
        let def = registry.compile(
            TypeDeclaration::new("Ticket")
                .field("id", FieldSpec::new(FieldKind::Integer))
                .field("subject", FieldSpec::new(FieldKind::Text)),
        );

        assert_eq!(def.primary_key(), "id");
        assert_eq!(def.fields().iter().filter(|f| f.name == "id").count(), 1);
        assert!(def.field("id").unwrap().is_primary());
        assert_eq!(def.column_aliases().len(), 2);
        assert_eq!(def.ordering(), "id ASC");
    }

    #[test]
    fn first_compilation_wins() {
        let registry = RecordRegistry::new();
        let first = registry.compile(widget("name"));
        let second = registry.compile(widget("colour"));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.has_field("name"));
        assert!(!second.has_field("colour"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn partitions_fields_and_relations() {
        let registry = RecordRegistry::new();
        let def = registry.compile(
            TypeDeclaration::new("Book")
                .table("books")
                .ordering("title DESC")
                .field("title", FieldSpec::new(FieldKind::Text))
                .relation("publisher", RelationSpec::belongs_to("Publisher")),
        );

        assert_eq!(def.fields().len(), 2);
        assert!(def.relation("publisher").is_ok());
        assert!(def.relation("title").is_err());
        assert_eq!(
            def.column_aliases(),
            &[
                "books.id AS \"Book.id\"".to_string(),
                "books.title AS \"Book.title\"".to_string(),
            ]
        );
    }

    #[test]
    fn concurrent_compilation_stores_one_definition() {
        let registry = Arc::new(RecordRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.compile(widget(&format!("field_{i}"))))
            })
            .collect();

        let defs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let stored = registry.get("Widget").unwrap();

        assert!(defs.iter().all(|d| Arc::ptr_eq(d, &stored)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn require_reports_unknown_types() {
        let registry = RecordRegistry::new();
        assert!(registry.require("Ghost").is_err());
    }
}
