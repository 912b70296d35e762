use crate::libs::driver::{Execution, Row};
use crate::libs::error::{CallerError, OrmError, OrmResult};
use crate::libs::orm::Orm;
use crate::libs::query_builder::{
    merge_options, CountQuery, DeleteQuery, Identifier, Predicate, QueryOptions, SelectQuery,
    Statement,
};
use crate::libs::record::{integer_value, RecordInstance};
use crate::libs::registry::RecordTypeDefinition;
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

/// Result of [`Model::find`]: a point lookup or a collection lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Found {
    One(Option<RecordInstance>),
    Many(Vec<RecordInstance>),
}

impl Found {
    pub fn into_records(self) -> Vec<RecordInstance> {
        match self {
            Self::One(record) => record.into_iter().collect(),
            Self::Many(records) => records,
        }
    }
}

/// A handle to one compiled record type.
pub struct Model<'a> {
    orm: &'a Orm,
    definition: Arc<RecordTypeDefinition>,
}

impl<'a> Model<'a> {
    pub(crate) fn new(orm: &'a Orm, definition: Arc<RecordTypeDefinition>) -> Self {
        Self { orm, definition }
    }

    pub fn definition(&self) -> &Arc<RecordTypeDefinition> {
        &self.definition
    }

    /// Builds a record from a JSON object.
    ///
    /// # Example
    /// ```ignore
    /// let nail = orm.model("Widget")?.build(json!({"name": "Nail"}))?;
    /// ```
    pub fn build(&self, data: Value) -> OrmResult<RecordInstance> {
        match data {
            Value::Object(map) => RecordInstance::new(Arc::clone(&self.definition), map),
            Value::Null => RecordInstance::new(Arc::clone(&self.definition), Row::new()),
            other => Err(CallerError::InvalidRecordData(other.to_string()).into()),
        }
    }

    /// `find(id)` looks up one row by primary key; `find("all")` or
    /// `find(Identifier::All)` returns every row matched by `options`.
    pub async fn find(&self, id: impl Into<Identifier>, options: &QueryOptions) -> OrmResult<Found> {
        match id.into().resolve()? {
            Some(id) => Ok(Found::One(self.find_by_id(id, options).await?)),
            None => Ok(Found::Many(self.find_all(options).await?)),
        }
    }

    fn point_query(&self, id: i64, extra: &QueryOptions) -> OrmResult<SelectQuery> {
        let mut query = merge_options(&self.definition, extra)?;
        query.predicate = query
            .predicate
            .where_eq(self.definition.primary_key(), id);
        if extra.order.is_none() {
            query.order.clear();
        }
        query.limit = Some(1);
        query.offset = None;

        Ok(query)
    }

    /// Point lookup that keeps storage failures apart from absence:
    /// `Ok(None)` means no row matched.
    pub async fn try_find_by_id(&self, id: i64, extra: &QueryOptions) -> OrmResult<Option<RecordInstance>> {
        let query = self.point_query(id, extra)?;
        let rows = self
            .orm
            .driver()
            .select(&query, Execution::Live)
            .await?
            .executed()?;

        let require_key = query.projection.is_none();
        match rows.into_iter().next() {
            Some(row) => Ok(Some(RecordInstance::from_row(
                Arc::clone(&self.definition),
                row,
                require_key,
            )?)),
            None => Ok(None),
        }
    }

    /// Point lookup returning `None` both when no row matches and when the
    /// storage driver fails (the failure is logged). Caller errors such as an
    /// unknown filter field still surface.
    pub async fn find_by_id(&self, id: i64, extra: &QueryOptions) -> OrmResult<Option<RecordInstance>> {
        match self.try_find_by_id(id, extra).await {
            Ok(found) => Ok(found),
            Err(err) if err.is_storage() => {
                warn!(
                    "event=find_by_id status=collapsed type={} id={} error={}",
                    self.definition.name(),
                    id,
                    err
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Every row matched by `options`, in the order the driver returns them.
    pub async fn find_all(&self, options: &QueryOptions) -> OrmResult<Vec<RecordInstance>> {
        let query = merge_options(&self.definition, options)?;
        let rows = self
            .orm
            .driver()
            .select(&query, Execution::Live)
            .await?
            .executed()?;

        debug!(
            "event=find_all type={} rows={} limit={:?} offset={:?}",
            self.definition.name(),
            rows.len(),
            query.limit,
            query.offset
        );

        let require_key = query.projection.is_none();
        rows.into_iter()
            .map(|row| {
                RecordInstance::from_row(Arc::clone(&self.definition), row, require_key)
                    .map_err(OrmError::from)
            })
            .collect()
    }

    pub async fn all(&self) -> OrmResult<Vec<RecordInstance>> {
        self.find_all(&QueryOptions::default()).await
    }

    fn count_query(&self, filter: Option<&Value>, options: &QueryOptions) -> OrmResult<CountQuery> {
        let predicate = match filter {
            Some(filter) => Predicate::from_filter(&self.definition, filter)?,
            None => Predicate::new(),
        };

        let column = match options.projection.as_deref() {
            Some([column, ..]) => {
                self.definition.require_field(column)?;
                Some(column.clone())
            }
            _ => None,
        };

        Ok(CountQuery {
            table: self.definition.table().to_string(),
            predicate,
            column,
        })
    }

    /// Row count that reports storage failures as errors.
    pub async fn try_count(&self, filter: Option<&Value>, options: &QueryOptions) -> OrmResult<Option<i64>> {
        let query = self.count_query(filter, options)?;
        Ok(self
            .orm
            .driver()
            .count(&query, Execution::Live)
            .await?
            .executed()?)
    }

    /// Row count, or `None` when the storage driver yields no usable result.
    pub async fn count(&self, filter: Option<&Value>, options: &QueryOptions) -> OrmResult<Option<i64>> {
        match self.try_count(filter, options).await {
            Err(err) if err.is_storage() => {
                warn!(
                    "event=count status=collapsed type={} error={}",
                    self.definition.name(),
                    err
                );
                Ok(None)
            }
            other => other,
        }
    }

    fn delete_query(&self, ids: &[i64]) -> OrmResult<DeleteQuery> {
        if ids.is_empty() {
            return Err(CallerError::EmptyIdList.into());
        }

        Ok(DeleteQuery {
            table: self.definition.table().to_string(),
            predicate: Predicate::new().where_in(
                self.definition.primary_key(),
                ids.iter().copied().map(Value::from).collect(),
            ),
        })
    }

    /// Deletes every row whose primary key is in `ids` with one statement.
    /// Records are not instantiated.
    pub async fn delete_all(&self, ids: &[i64]) -> OrmResult<u64> {
        let query = self.delete_query(ids)?;
        let removed = self
            .orm
            .driver()
            .delete(&query, Execution::Live)
            .await?
            .executed()?;

        debug!(
            "event=delete_all type={} requested={} removed={}",
            self.definition.name(),
            ids.len(),
            removed
        );
        Ok(removed)
    }

    /// [`delete_all`](Self::delete_all) for ids arriving as JSON. Anything but
    /// an array of integers (or numeric strings) is a caller error.
    pub async fn delete_all_value(&self, ids: &Value) -> OrmResult<u64> {
        let Value::Array(items) = ids else {
            return Err(CallerError::NotASequence(ids.to_string()).into());
        };

        let ids = items
            .iter()
            .map(|v| integer_value(v).ok_or_else(|| CallerError::InvalidIdentifier(v.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        self.delete_all(&ids).await
    }

    // -------- Dry-run statements --------

    pub async fn explain_find_by_id(&self, id: i64, extra: &QueryOptions) -> OrmResult<Statement> {
        let query = self.point_query(id, extra)?;
        Ok(self.orm.driver().select(&query, Execution::DryRun).await?.planned()?)
    }

    pub async fn explain_find_all(&self, options: &QueryOptions) -> OrmResult<Statement> {
        let query = merge_options(&self.definition, options)?;
        Ok(self.orm.driver().select(&query, Execution::DryRun).await?.planned()?)
    }

    pub async fn explain_count(&self, filter: Option<&Value>, options: &QueryOptions) -> OrmResult<Statement> {
        let query = self.count_query(filter, options)?;
        Ok(self.orm.driver().count(&query, Execution::DryRun).await?.planned()?)
    }

    pub async fn explain_delete_all(&self, ids: &[i64]) -> OrmResult<Statement> {
        let query = self.delete_query(ids)?;
        Ok(self.orm.driver().delete(&query, Execution::DryRun).await?.planned()?)
    }
}
