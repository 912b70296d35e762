#![allow(dead_code)]

use async_trait::async_trait;
use recordmap::{
    CountQuery, DeleteQuery, DriverResult, Execution, FieldKind, FieldSpec, InsertQuery,
    MemoryDriver, Orm, Outcome, RecordRegistry, RelationSpec, Row, SelectQuery, StorageDriver,
    StorageError, TypeDeclaration, UpdateQuery,
};
use serde_json::Value;
use std::sync::Arc;

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub fn declare_widget(orm: &Orm) {
    orm.compile(
        TypeDeclaration::new("Widget")
            .field("name", FieldSpec::new(FieldKind::Text).max_length(64))
            .field("stock", FieldSpec::new(FieldKind::Integer).nullable()),
    );
}

/// Owner, Post and Comment: owner has many posts, post belongs to owner.
pub fn declare_blog(orm: &Orm) {
    orm.compile(
        TypeDeclaration::new("Owner")
            .field("name", FieldSpec::new(FieldKind::Text))
            .relation("posts", RelationSpec::has_many("Post"))
            .relation("tags", RelationSpec::many_to_many("Tag")),
    );
    orm.compile(
        TypeDeclaration::new("Post")
            .field("title", FieldSpec::new(FieldKind::Text))
            .field("owner_id", FieldSpec::new(FieldKind::Integer).nullable().indexed())
            .relation("owner", RelationSpec::belongs_to("Owner"))
            .relation("comments", RelationSpec::has_many("Comment").join_field("article_id")),
    );
    orm.compile(
        TypeDeclaration::new("Comment")
            .field("body", FieldSpec::new(FieldKind::Text))
            .field("article_id", FieldSpec::new(FieldKind::Integer)),
    );
}

pub fn memory_orm() -> (Orm, Arc<MemoryDriver>) {
    let driver = Arc::new(MemoryDriver::new());
    let orm = Orm::new(driver.clone(), Arc::new(RecordRegistry::new()));
    (orm, driver)
}

/// Fails every live call; dry runs still describe themselves.
pub struct FailingDriver;

fn down() -> StorageError {
    StorageError::Unavailable("connection refused".into())
}

#[async_trait]
impl StorageDriver for FailingDriver {
    async fn select(&self, query: &SelectQuery, execution: Execution) -> DriverResult<Outcome<Vec<Row>>> {
        match execution {
            Execution::DryRun => Ok(Outcome::DryRun(recordmap::Statement::Select(query.clone()))),
            Execution::Live => Err(down()),
        }
    }

    async fn insert(&self, _: &InsertQuery, _: Execution) -> DriverResult<Outcome<Option<i64>>> {
        Err(down())
    }

    async fn update(&self, _: &UpdateQuery, _: Execution) -> DriverResult<Outcome<u64>> {
        Err(down())
    }

    async fn delete(&self, _: &DeleteQuery, _: Execution) -> DriverResult<Outcome<u64>> {
        Err(down())
    }

    async fn count(&self, _: &CountQuery, _: Execution) -> DriverResult<Outcome<Option<i64>>> {
        Err(down())
    }
}
