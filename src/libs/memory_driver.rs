use crate::libs::driver::{Execution, Outcome, Row, StorageDriver};
use crate::libs::error::DriverResult;
use crate::libs::query_builder::{
    Condition, CountQuery, DeleteQuery, InsertQuery, OrderTerm, Predicate, SelectQuery, Statement,
    UpdateQuery,
};
use async_trait::async_trait;
use log::trace;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<Row>,
    next_id: i64,
}

///
/// MemoryDriver
///
/// Keeps tables as plain row vectors and remembers every statement it ran.
/// Supports the same statement shapes as the SQL driver: equality and IN
/// predicates, ordering, limit/offset, projection and counts.
///

#[derive(Debug, Default)]
pub struct MemoryDriver {
    tables: Mutex<HashMap<String, MemoryTable>>,
    statements: Mutex<Vec<Statement>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads rows without recording a statement. Generated keys continue
    /// after the largest integer found in `primary_key`.
    pub fn seed(&self, table: &str, primary_key: &str, rows: Vec<Row>) {
        let mut tables = lock(&self.tables);
        let entry = tables.entry(table.to_string()).or_default();

        for row in rows {
            if let Some(id) = row.get(primary_key).and_then(Value::as_i64) {
                entry.next_id = entry.next_id.max(id);
            }
            entry.rows.push(row);
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Statements executed so far, oldest first. Dry runs are not recorded.
    pub fn statements(&self) -> Vec<Statement> {
        lock(&self.statements).clone()
    }

    pub fn clear_statements(&self) {
        lock(&self.statements).clear();
    }

    fn record(&self, statement: Statement) {
        trace!("event=memory_execute statement={statement}");
        lock(&self.statements).push(statement);
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn matches(row: &Row, predicate: &Predicate) -> bool {
    predicate.conditions().iter().all(|c| {
        let actual = row.get(c.field()).unwrap_or(&Value::Null);
        match c {
            Condition::Eq(_, expected) => values_equal(actual, expected),
            Condition::In(_, candidates) => candidates.iter().any(|v| values_equal(actual, v)),
        }
    })
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_rows(a: &Row, b: &Row, order: &[OrderTerm]) -> Ordering {
    for term in order {
        let left = a.get(&term.field).unwrap_or(&Value::Null);
        let right = b.get(&term.field).unwrap_or(&Value::Null);
        let ord = compare_values(left, right);
        let ord = if term.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn select(&self, query: &SelectQuery, execution: Execution) -> DriverResult<Outcome<Vec<Row>>> {
        let statement = Statement::Select(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let mut rows: Vec<Row> = {
            let tables = lock(&self.tables);
            tables
                .get(&query.table)
                .map(|t| t.rows.iter().filter(|r| matches(r, &query.predicate)).cloned().collect())
                .unwrap_or_default()
        };
        rows.sort_by(|a, b| compare_rows(a, b, &query.order));

        let offset = query.offset.map_or(0, to_usize);
        let limit = query.limit.map_or(usize::MAX, to_usize);
        let rows = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| match &query.projection {
                Some(cols) => row.into_iter().filter(|(k, _)| cols.contains(k)).collect(),
                None => row,
            })
            .collect();

        self.record(statement);
        Ok(Outcome::Executed(rows))
    }

    async fn insert(&self, query: &InsertQuery, execution: Execution) -> DriverResult<Outcome<Option<i64>>> {
        let statement = Statement::Insert(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let id = {
            let mut tables = lock(&self.tables);
            let table = tables.entry(query.table.clone()).or_default();
            table.next_id += 1;

            let mut row = query.attributes.clone();
            row.insert(query.primary_key.clone(), Value::from(table.next_id));
            table.rows.push(row);
            table.next_id
        };

        self.record(statement);
        Ok(Outcome::Executed(Some(id)))
    }

    async fn update(&self, query: &UpdateQuery, execution: Execution) -> DriverResult<Outcome<u64>> {
        let statement = Statement::Update(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let mut affected = 0;
        if let Some(table) = lock(&self.tables).get_mut(&query.table) {
            for row in table.rows.iter_mut().filter(|r| matches(r, &query.predicate)) {
                for (k, v) in &query.attributes {
                    row.insert(k.clone(), v.clone());
                }
                affected += 1;
            }
        }

        self.record(statement);
        Ok(Outcome::Executed(affected))
    }

    async fn delete(&self, query: &DeleteQuery, execution: Execution) -> DriverResult<Outcome<u64>> {
        let statement = Statement::Delete(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let mut affected = 0;
        if let Some(table) = lock(&self.tables).get_mut(&query.table) {
            let before = table.rows.len();
            table.rows.retain(|r| !matches(r, &query.predicate));
            affected = (before - table.rows.len()) as u64;
        }

        self.record(statement);
        Ok(Outcome::Executed(affected))
    }

    async fn count(&self, query: &CountQuery, execution: Execution) -> DriverResult<Outcome<Option<i64>>> {
        let statement = Statement::Count(query.clone());
        if execution == Execution::DryRun {
            return Ok(Outcome::DryRun(statement));
        }

        let count = lock(&self.tables).get(&query.table).map_or(0, |t| {
            t.rows
                .iter()
                .filter(|r| matches(r, &query.predicate))
                .filter(|r| match &query.column {
                    Some(col) => !r.get(col).unwrap_or(&Value::Null).is_null(),
                    None => true,
                })
                .count()
        });

        self.record(statement);
        Ok(Outcome::Executed(i64::try_from(count).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn seeded() -> MemoryDriver {
        let driver = MemoryDriver::new();
        driver.seed(
            "books",
            "id",
            vec![
                row(json!({"id": 1, "title": "B", "author_id": 7})),
                row(json!({"id": 2, "title": "A", "author_id": 7})),
                row(json!({"id": 3, "title": "C", "author_id": 8})),
            ],
        );
        driver
    }

    fn select(predicate: Predicate, order: Vec<OrderTerm>) -> SelectQuery {
        SelectQuery {
            table: "books".into(),
            predicate,
            projection: None,
            order,
            limit: Some(100),
            offset: Some(0),
        }
    }

    #[tokio::test]
    async fn select_filters_and_orders() {
        let driver = seeded();
        let order = vec![OrderTerm { field: "title".into(), descending: false }];
        let rows = driver
            .select(&select(Predicate::new().where_eq("author_id", 7), order), Execution::Live)
            .await
            .unwrap()
            .executed()
            .unwrap();

        let titles: Vec<_> = rows.iter().map(|r| r["title"].clone()).collect();
        assert_eq!(titles, vec![json!("A"), json!("B")]);
    }

    #[tokio::test]
    async fn insert_continues_after_seeded_keys() {
        let driver = seeded();
        let mut attributes = Row::new();
        attributes.insert("title".into(), json!("D"));

        let id = driver
            .insert(
                &InsertQuery { table: "books".into(), primary_key: "id".into(), attributes },
                Execution::Live,
            )
            .await
            .unwrap()
            .executed()
            .unwrap();

        assert_eq!(id, Some(4));
        assert_eq!(driver.rows("books").len(), 4);
    }

    #[tokio::test]
    async fn dry_run_leaves_data_alone() {
        let driver = seeded();
        let query = DeleteQuery {
            table: "books".into(),
            predicate: Predicate::new().where_in("id", vec![json!(1), json!(2)]),
        };

        let outcome = driver.delete(&query, Execution::DryRun).await.unwrap();

        assert_eq!(outcome, Outcome::DryRun(Statement::Delete(query)));
        assert_eq!(driver.rows("books").len(), 3);
        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn count_respects_predicate() {
        let driver = seeded();
        let query = CountQuery {
            table: "books".into(),
            predicate: Predicate::new().where_eq("author_id", 8),
            column: None,
        };

        let count = driver.count(&query, Execution::Live).await.unwrap().executed().unwrap();
        assert_eq!(count, Some(1));
    }
}
