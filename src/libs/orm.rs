use crate::libs::driver::{Execution, StorageDriver};
use crate::libs::error::{CallerError, OrmResult, StorageError};
use crate::libs::model::{Found, Model};
use crate::libs::query_builder::{
    Identifier, InsertQuery, Predicate, QueryOptions, Statement, UpdateQuery,
};
use crate::libs::record::{integer_value, RecordInstance};
use crate::libs::registry::{RecordRegistry, RecordTypeDefinition};
use crate::libs::schema::{RelationKind, RelationSpec, TypeDeclaration};
use log::debug;
use serde_json::Value;
use std::sync::Arc;

/// What [`Orm::save`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing was dirty; no statement was issued.
    Unchanged,
    /// Rows affected by the update. Zero leaves the record dirty.
    Updated(u64),
    /// Generated primary key of the new row.
    Inserted(i64),
}

impl SaveOutcome {
    /// False for a no-op and for an update that touched no rows.
    pub fn is_saved(self) -> bool {
        match self {
            Self::Unchanged => false,
            Self::Updated(n) => n > 0,
            Self::Inserted(_) => true,
        }
    }
}

/// A resolved relation.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<RecordInstance>),
    Many(Vec<RecordInstance>),
}

enum SavePlan {
    Insert(InsertQuery),
    Update(UpdateQuery),
}

///
/// Orm
///
/// Entry point handed to the routing layer: compiles record types into the
/// injected registry and runs every read and write through the storage driver.
///

#[derive(Clone)]
pub struct Orm {
    driver: Arc<dyn StorageDriver>,
    registry: Arc<RecordRegistry>,
}

impl Orm {
    pub fn new(driver: Arc<dyn StorageDriver>, registry: Arc<RecordRegistry>) -> Self {
        Self { driver, registry }
    }

    /// An `Orm` with its own empty registry.
    pub fn with_driver(driver: impl StorageDriver + 'static) -> Self {
        Self::new(Arc::new(driver), Arc::new(RecordRegistry::new()))
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    pub fn registry(&self) -> &Arc<RecordRegistry> {
        &self.registry
    }

    pub fn compile(&self, decl: TypeDeclaration) -> Arc<RecordTypeDefinition> {
        self.registry.compile(decl)
    }

    /// A handle to a compiled record type.
    ///
    /// # Example
    /// ```ignore
    /// let books = orm.model("Book")?;
    /// let page = books.find_all(&QueryOptions::new().page(2)).await?;
    /// ```
    pub fn model(&self, type_name: &str) -> OrmResult<Model<'_>> {
        Ok(Model::new(self, self.registry.require(type_name)?))
    }

    pub fn build(&self, type_name: &str, data: Value) -> OrmResult<RecordInstance> {
        self.model(type_name)?.build(data)
    }

    // -------- Reads --------

    pub async fn find(
        &self,
        type_name: &str,
        id: impl Into<Identifier>,
        options: &QueryOptions,
    ) -> OrmResult<Found> {
        self.model(type_name)?.find(id, options).await
    }

    pub async fn find_by_id(
        &self,
        type_name: &str,
        id: i64,
        extra: &QueryOptions,
    ) -> OrmResult<Option<RecordInstance>> {
        self.model(type_name)?.find_by_id(id, extra).await
    }

    pub async fn find_all(&self, type_name: &str, options: &QueryOptions) -> OrmResult<Vec<RecordInstance>> {
        self.model(type_name)?.find_all(options).await
    }

    pub async fn count(
        &self,
        type_name: &str,
        filter: Option<&Value>,
        options: &QueryOptions,
    ) -> OrmResult<Option<i64>> {
        self.model(type_name)?.count(filter, options).await
    }

    pub async fn delete_all(&self, type_name: &str, ids: &[i64]) -> OrmResult<u64> {
        self.model(type_name)?.delete_all(ids).await
    }

    // -------- Writes --------

    fn save_plan(record: &RecordInstance) -> Option<SavePlan> {
        if !record.is_dirty() {
            return None;
        }

        let def = record.definition();
        let attributes = record.dirty_attributes();

        let plan = match record.get(def.primary_key()) {
            Some(key) => SavePlan::Update(UpdateQuery {
                table: def.table().to_string(),
                predicate: Predicate::new().where_eq(def.primary_key(), key.clone()),
                attributes,
            }),
            None => SavePlan::Insert(InsertQuery {
                table: def.table().to_string(),
                primary_key: def.primary_key().to_string(),
                attributes,
            }),
        };

        Some(plan)
    }

    /// Persists the dirty attributes of `record`.
    ///
    /// A record with a primary key is updated; the dirty set is cleared only
    /// when at least one row was affected, so a zero-row update can be
    /// retried. A record without one is inserted and receives the generated
    /// key. On any error the record is left untouched.
    pub async fn save(&self, record: &mut RecordInstance) -> OrmResult<SaveOutcome> {
        let Some(plan) = Self::save_plan(record) else {
            return Ok(SaveOutcome::Unchanged);
        };

        let outcome = match plan {
            SavePlan::Update(query) => {
                let affected = self.driver.update(&query, Execution::Live).await?.executed()?;
                if affected > 0 {
                    record.mark_clean();
                }
                SaveOutcome::Updated(affected)
            }
            SavePlan::Insert(query) => {
                let id = self
                    .driver
                    .insert(&query, Execution::Live)
                    .await?
                    .executed()?
                    .ok_or_else(|| StorageError::MissingGeneratedKey(query.table.clone()))?;
                record.assign_primary_key(id);
                record.mark_clean();
                SaveOutcome::Inserted(id)
            }
        };

        debug!(
            "event=save type={} outcome={:?}",
            record.definition().name(),
            outcome
        );
        Ok(outcome)
    }

    /// The statement `save` would issue, or `None` for a clean record.
    pub async fn explain_save(&self, record: &RecordInstance) -> OrmResult<Option<Statement>> {
        let statement = match Self::save_plan(record) {
            None => return Ok(None),
            Some(SavePlan::Update(query)) => {
                self.driver.update(&query, Execution::DryRun).await?.planned()?
            }
            Some(SavePlan::Insert(query)) => {
                self.driver.insert(&query, Execution::DryRun).await?.planned()?
            }
        };

        Ok(Some(statement))
    }

    // -------- Relations --------

    fn relation_of<'r>(
        record: &'r RecordInstance,
        relation: &str,
        expected: RelationKind,
    ) -> OrmResult<&'r RelationSpec> {
        let spec = record.definition().relation(relation)?;

        match spec.kind {
            RelationKind::ManyToMany => {
                Err(CallerError::UnsupportedRelation(relation.to_string()).into())
            }
            kind if kind != expected => Err(CallerError::RelationKindMismatch {
                relation: relation.to_string(),
                expected: expected.as_str(),
                actual: kind.as_str(),
            }
            .into()),
            _ => Ok(spec),
        }
    }

    /// Resolves a belongs-to relation with a point lookup on the target type.
    /// `None` when the join field is unset or no row matches.
    pub async fn belongs_to(&self, record: &RecordInstance, relation: &str) -> OrmResult<Option<RecordInstance>> {
        let spec = Self::relation_of(record, relation, RelationKind::BelongsTo)?;
        let target = self.model(&spec.target_type)?;

        let join_field = spec
            .join_field
            .clone()
            .unwrap_or_else(|| format!("{}_id", target.definition().table()));

        let Some(id) = record.get(&join_field).and_then(integer_value) else {
            return Ok(None);
        };

        target.find_by_id(id, &QueryOptions::default()).await
    }

    /// Resolves a has-many relation with a collection lookup on the target
    /// type filtered by the owner's primary key. `options` paginate and
    /// filter further; the join condition wins over a filter on the same field.
    pub async fn has_many(
        &self,
        record: &RecordInstance,
        relation: &str,
        options: &QueryOptions,
    ) -> OrmResult<Vec<RecordInstance>> {
        let spec = Self::relation_of(record, relation, RelationKind::HasMany)?;
        let target = self.model(&spec.target_type)?;
        let owner = record.definition();

        let join_field = spec
            .join_field
            .clone()
            .unwrap_or_else(|| format!("{}_id", owner.table()));

        let Some(key) = record.get(owner.primary_key()) else {
            return Ok(Vec::new());
        };

        let mut filter = match &options.filter {
            Some(Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        filter.insert(join_field, key.clone());

        let options = QueryOptions {
            filter: Some(Value::Object(filter)),
            ..options.clone()
        };

        target.find_all(&options).await
    }

    /// Resolves `relation` according to its declared kind.
    pub async fn related(&self, record: &RecordInstance, relation: &str) -> OrmResult<Related> {
        let spec = record.definition().relation(relation)?;

        match spec.kind {
            RelationKind::BelongsTo => Ok(Related::One(self.belongs_to(record, relation).await?)),
            RelationKind::HasMany => Ok(Related::Many(
                self.has_many(record, relation, &QueryOptions::default()).await?,
            )),
            RelationKind::ManyToMany => {
                Err(CallerError::UnsupportedRelation(relation.to_string()).into())
            }
        }
    }
}
