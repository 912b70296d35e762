use crate::libs::error::{CallerError, OrmResult};
use crate::libs::registry::RecordTypeDefinition;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const DEFAULT_LIMIT: u64 = 100;

pub type Attributes = Map<String, Value>;

/// One term of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Self::Eq(field, _) | Self::In(field, _) => field,
        }
    }
}

/// A conjunction of conditions; at most one condition per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `field = value`, replacing any earlier condition on `field`.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Condition::Eq(field.into(), value.into()));
        self
    }

    pub fn where_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.push(Condition::In(field.into(), values));
        self
    }

    fn push(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.field() == condition.field())
        {
            Some(slot) => *slot = condition,
            None => self.conditions.push(condition),
        }
    }

    /// Compiles a filter mapping into equality conditions. Keys must be
    /// declared fields of `def`.
    pub fn from_filter(def: &RecordTypeDefinition, filter: &Value) -> OrmResult<Self> {
        let Value::Object(map) = filter else {
            return Err(CallerError::InvalidFilter(filter.to_string()).into());
        };

        let mut predicate = Self::new();
        for (field, value) in map {
            def.require_field(field)?;
            predicate = predicate.where_eq(field.clone(), value.clone());
        }

        Ok(predicate)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn get(&self, field: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.field() == field)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn render(&self, params: &mut Vec<Value>) -> Option<String> {
        if self.conditions.is_empty() {
            return None;
        }

        let conds: Vec<String> = self
            .conditions
            .iter()
            .map(|c| match c {
                Condition::Eq(field, value) => {
                    params.push(value.clone());
                    format!("{} = ${}", quote_ident(field), params.len())
                }
                Condition::In(field, values) => {
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|v| {
                            params.push(v.clone());
                            format!("${}", params.len())
                        })
                        .collect();
                    format!("{} IN ({})", quote_ident(field), placeholders.join(", "))
                }
            })
            .collect();

        Some(conds.join(" AND "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderTerm {
    pub field: String,
    pub descending: bool,
}

impl fmt::Display for OrderTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.descending { "DESC" } else { "ASC" };
        write!(f, "{} {}", self.field, dir)
    }
}

/// Parses `"name DESC, id"` into terms, checking every field against `def`.
pub fn parse_ordering(def: &RecordTypeDefinition, order: &str) -> OrmResult<Vec<OrderTerm>> {
    let invalid = || CallerError::InvalidOrdering(order.to_string());
    let mut terms = Vec::new();

    for part in order.split(',') {
        let mut words = part.split_whitespace();
        let field = words.next().ok_or_else(invalid)?;
        let descending = match words.next().map(str::to_ascii_uppercase).as_deref() {
            None | Some("ASC") => false,
            Some("DESC") => true,
            Some(_) => return Err(invalid().into()),
        };
        if words.next().is_some() || !def.has_field(field) {
            return Err(invalid().into());
        }
        terms.push(OrderTerm {
            field: field.to_string(),
            descending,
        });
    }

    Ok(terms)
}

///
/// QueryOptions
///
/// Caller-facing find/filter/pagination options. `limit` and `page` accept
/// numbers or numeric strings, as they arrive from query parameters.
///

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub limit: Option<Value>,
    #[serde(default)]
    pub page: Option<Value>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default, rename = "where")]
    pub filter: Option<Value>,
    #[serde(default, alias = "what", deserialize_with = "projection_fields")]
    pub projection: Option<Vec<String>>,
}

/// `"name"`, `"name, stock"` and `["name", "stock"]` all name columns.
fn projection_fields<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<String>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Columns {
        Joined(String),
        List(Vec<String>),
    }

    Ok(Option::<Columns>::deserialize(de)?.map(|columns| match columns {
        Columns::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect(),
        Columns::List(list) => list,
    }))
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: Value) -> OrmResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| CallerError::InvalidFilter(e.to_string()).into())
    }

    pub fn limit(mut self, limit: impl Into<Value>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    pub fn page(mut self, page: impl Into<Value>) -> Self {
        self.page = Some(page.into());
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn projection(mut self, fields: &[&str]) -> Self {
        self.projection = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalizes `options` into a select over `def`'s table.
///
/// - `limit`: the given integer, else 100
/// - `offset`: 0 for page <= 1, else (page - 1) * limit
/// - `order`: the given ordering, else the definition's default
/// - `where`: a mapping compiles to an equality conjunction; anything else is ignored
pub fn merge_options(def: &RecordTypeDefinition, options: &QueryOptions) -> OrmResult<SelectQuery> {
    let limit = options
        .limit
        .as_ref()
        .and_then(as_integer)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(DEFAULT_LIMIT);

    let page = options.page.as_ref().and_then(as_integer).unwrap_or(1);
    let offset = if page <= 1 {
        0
    } else {
        (page.unsigned_abs() - 1).saturating_mul(limit)
    };

    let order = parse_ordering(def, options.order.as_deref().unwrap_or(def.ordering()))?;

    let predicate = match &options.filter {
        Some(filter @ Value::Object(_)) => Predicate::from_filter(def, filter)?,
        _ => Predicate::new(),
    };

    let projection = match &options.projection {
        Some(fields) => {
            for field in fields {
                def.require_field(field)?;
            }
            Some(fields.clone())
        }
        None => None,
    };

    Ok(SelectQuery {
        table: def.table().to_string(),
        predicate,
        projection,
        order,
        limit: Some(limit),
        offset: Some(offset),
    })
}

/// What `find` was asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Id(i64),
    Key(String),
    All,
}

impl Identifier {
    pub const ALL_MARKER: &'static str = "all";

    /// `Some(id)` for a point lookup, `None` for a collection lookup.
    pub fn resolve(&self) -> Result<Option<i64>, CallerError> {
        match self {
            Self::Id(id) => Ok(Some(*id)),
            Self::All => Ok(None),
            Self::Key(key) if key == Self::ALL_MARKER => Ok(None),
            Self::Key(key) => key
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| CallerError::InvalidIdentifier(key.clone())),
        }
    }
}

impl From<i64> for Identifier {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Identifier {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<Option<i64>> for Identifier {
    fn from(id: Option<i64>) -> Self {
        id.map_or(Self::All, Self::Id)
    }
}

// -------- Statement descriptions --------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectQuery {
    pub table: String,
    pub predicate: Predicate,
    pub projection: Option<Vec<String>>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    /// The ordering rendered back as `"field DIR, ..."`.
    pub fn order_clause(&self) -> String {
        self.order
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertQuery {
    pub table: String,
    pub primary_key: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateQuery {
    pub table: String,
    pub predicate: Predicate,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteQuery {
    pub table: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountQuery {
    pub table: String,
    pub predicate: Predicate,
    pub column: Option<String>,
}

/// A statement a driver would execute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Select(SelectQuery),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    Count(CountQuery),
}

/// Rendered SQL with its positional (`$n`) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlText {
    pub sql: String,
    pub params: Vec<Value>,
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Self::Select(q) => &q.table,
            Self::Insert(q) => &q.table,
            Self::Update(q) => &q.table,
            Self::Delete(q) => &q.table,
            Self::Count(q) => &q.table,
        }
    }

    pub fn to_sql(&self) -> SqlText {
        let mut params = Vec::new();
        let sql = match self {
            Self::Select(q) => {
                let cols = match &q.projection {
                    Some(cols) => cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
                    None => "*".to_string(),
                };
                let mut sql = format!("SELECT {} FROM {}", cols, quote_ident(&q.table));
                if let Some(conds) = q.predicate.render(&mut params) {
                    sql += &format!(" WHERE {conds}");
                }
                if !q.order.is_empty() {
                    let order: Vec<String> = q
                        .order
                        .iter()
                        .map(|t| {
                            let dir = if t.descending { "DESC" } else { "ASC" };
                            format!("{} {}", quote_ident(&t.field), dir)
                        })
                        .collect();
                    sql += &format!(" ORDER BY {}", order.join(", "));
                }
                if let Some(limit) = q.limit {
                    sql += &format!(" LIMIT {limit}");
                }
                if let Some(offset) = q.offset {
                    sql += &format!(" OFFSET {offset}");
                }
                sql
            }
            Self::Insert(q) => {
                if q.attributes.is_empty() {
                    format!(
                        "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                        quote_ident(&q.table),
                        quote_ident(&q.primary_key)
                    )
                } else {
                    let mut cols = Vec::new();
                    let mut placeholders = Vec::new();
                    for (col, value) in &q.attributes {
                        cols.push(quote_ident(col));
                        params.push(value.clone());
                        placeholders.push(format!("${}", params.len()));
                    }
                    format!(
                        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                        quote_ident(&q.table),
                        cols.join(", "),
                        placeholders.join(", "),
                        quote_ident(&q.primary_key)
                    )
                }
            }
            Self::Update(q) => {
                let sets: Vec<String> = q
                    .attributes
                    .iter()
                    .map(|(col, value)| {
                        params.push(value.clone());
                        format!("{} = ${}", quote_ident(col), params.len())
                    })
                    .collect();
                let mut sql = format!("UPDATE {} SET {}", quote_ident(&q.table), sets.join(", "));
                if let Some(conds) = q.predicate.render(&mut params) {
                    sql += &format!(" WHERE {conds}");
                }
                sql
            }
            Self::Delete(q) => {
                let mut sql = format!("DELETE FROM {}", quote_ident(&q.table));
                if let Some(conds) = q.predicate.render(&mut params) {
                    sql += &format!(" WHERE {conds}");
                }
                sql
            }
            Self::Count(q) => {
                let target = q.column.as_deref().map_or_else(|| "*".to_string(), quote_ident);
                let mut sql = format!(
                    "SELECT COUNT({}) AS count FROM {}",
                    target,
                    quote_ident(&q.table)
                );
                if let Some(conds) = q.predicate.render(&mut params) {
                    sql += &format!(" WHERE {conds}");
                }
                sql
            }
        };

        SqlText { sql, params }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<sql: {}>", self.to_sql().sql)
    }
}
