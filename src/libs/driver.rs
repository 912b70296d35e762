use crate::libs::error::{DriverResult, StorageError};
use crate::libs::query_builder::{
    CountQuery, DeleteQuery, InsertQuery, SelectQuery, Statement, UpdateQuery,
};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub type Row = Map<String, Value>;

/// Whether a driver call runs against storage or only describes itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Execution {
    #[default]
    Live,
    DryRun,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Executed(T),
    DryRun(Statement),
}

impl<T> Outcome<T> {
    pub fn executed(self) -> DriverResult<T> {
        match self {
            Self::Executed(value) => Ok(value),
            Self::DryRun(_) => Err(StorageError::UnexpectedDryRun),
        }
    }

    pub fn planned(self) -> DriverResult<Statement> {
        match self {
            Self::DryRun(statement) => Ok(statement),
            Self::Executed(_) => Err(StorageError::UnexpectedExecution),
        }
    }
}

///
/// StorageDriver
///
/// The only way the core touches storage. Every call acquires its own
/// connection and gives it back before returning. With
/// [`Execution::DryRun`] a driver returns the statement instead of running
/// it and leaves stored data untouched.
///

#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn select(&self, query: &SelectQuery, execution: Execution) -> DriverResult<Outcome<Vec<Row>>>;

    /// Returns the generated primary key, if the backend produced one.
    async fn insert(&self, query: &InsertQuery, execution: Execution) -> DriverResult<Outcome<Option<i64>>>;

    async fn update(&self, query: &UpdateQuery, execution: Execution) -> DriverResult<Outcome<u64>>;

    async fn delete(&self, query: &DeleteQuery, execution: Execution) -> DriverResult<Outcome<u64>>;

    /// `None` when the backend produced no usable count.
    async fn count(&self, query: &CountQuery, execution: Execution) -> DriverResult<Outcome<Option<i64>>>;
}
