use crate::libs::config::DatabaseConfig;
use crate::libs::driver::{Execution, Outcome, Row, StorageDriver};
use crate::libs::error::{DriverResult, StorageError};
use crate::libs::query_builder::{
    CountQuery, DeleteQuery, InsertQuery, SelectQuery, SqlText, Statement, UpdateQuery,
};
use async_trait::async_trait;
use log::{info, trace};
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow, install_default_drivers};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Row as _};
use std::time::Duration;

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// Storage driver backed by a pooled sqlx connection (sqlite or postgres).
#[derive(Debug, Clone)]
pub struct SqlxDriver {
    pool: AnyPool,
}

impl SqlxDriver {
    pub async fn connect(config: &DatabaseConfig) -> DriverResult<Self> {
        install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            "event=db_connect module=sqlx_driver status=ok backend={} max_connections={}",
            config.backend(),
            config.max_connections
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Executes raw SQL (DDL, bootstrap data) and returns the affected row count.
    pub async fn raw(&self, sql: &str) -> DriverResult<u64> {
        trace!("event=sql_raw sql={sql}");
        let result = sqlx::query::<Any>(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    fn prepare(text: &SqlText) -> AnyQuery<'_> {
        trace!("event=sql_execute sql={} params={}", text.sql, text.params.len());

        text.params
            .iter()
            .fold(sqlx::query::<Any>(&text.sql), bind_value)
    }
}

fn bind_value<'q>(query: AnyQuery<'q>, value: &Value) -> AnyQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn decode_row(row: &AnyRow) -> Row {
    let mut map = Row::new();

    for col in row.columns() {
        let col_name = col.name();
        let value = match row.try_get::<Option<i64>, _>(col_name) {
            Ok(Some(v)) => Value::from(v),
            Ok(None) => Value::Null,
            Err(_) => match row.try_get::<Option<f64>, _>(col_name) {
                Ok(Some(v)) => Value::from(v),
                Ok(None) => Value::Null,
                Err(_) => match row.try_get::<Option<bool>, _>(col_name) {
                    Ok(Some(v)) => Value::from(v),
                    Ok(None) => Value::Null,
                    Err(_) => match row.try_get::<Option<String>, _>(col_name) {
                        Ok(Some(v)) => Value::from(v),
                        _ => Value::Null,
                    },
                },
            },
        };
        map.insert(col_name.to_string(), value);
    }

    map
}

#[async_trait]
impl StorageDriver for SqlxDriver {
    async fn select(&self, query: &SelectQuery, execution: Execution) -> DriverResult<Outcome<Vec<Row>>> {
        let statement = Statement::Select(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let text = statement.to_sql();
        let rows = Self::prepare(&text).fetch_all(&self.pool).await?;

        Ok(Outcome::Executed(rows.iter().map(decode_row).collect()))
    }

    async fn insert(&self, query: &InsertQuery, execution: Execution) -> DriverResult<Outcome<Option<i64>>> {
        let statement = Statement::Insert(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let text = statement.to_sql();
        let row = Self::prepare(&text).fetch_optional(&self.pool).await?;

        let key = match row {
            Some(row) => row
                .try_get::<Option<i64>, _>(0)
                .map_err(|e| StorageError::Decode {
                    column: query.primary_key.clone(),
                    reason: e.to_string(),
                })?,
            None => None,
        };

        Ok(Outcome::Executed(key))
    }

    async fn update(&self, query: &UpdateQuery, execution: Execution) -> DriverResult<Outcome<u64>> {
        let statement = Statement::Update(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let text = statement.to_sql();
        let result = Self::prepare(&text).execute(&self.pool).await?;

        Ok(Outcome::Executed(result.rows_affected()))
    }

    async fn delete(&self, query: &DeleteQuery, execution: Execution) -> DriverResult<Outcome<u64>> {
        let statement = Statement::Delete(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let text = statement.to_sql();
        let result = Self::prepare(&text).execute(&self.pool).await?;

        Ok(Outcome::Executed(result.rows_affected()))
    }

    async fn count(&self, query: &CountQuery, execution: Execution) -> DriverResult<Outcome<Option<i64>>> {
        let statement = Statement::Count(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let text = statement.to_sql();
        let row = Self::prepare(&text).fetch_optional(&self.pool).await?;

        Ok(Outcome::Executed(
            row.and_then(|r| r.try_get::<Option<i64>, _>("count").ok().flatten()),
        ))
    }
}
