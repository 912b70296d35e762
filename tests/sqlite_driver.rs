mod common;

use common::declare_widget;
use recordmap::{Orm, QueryOptions, RecordRegistry, SaveOutcome, SqlxDriver};
use serde_json::json;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use std::sync::Arc;

async fn sqlite_driver() -> SqlxDriver {
    install_default_drivers();

    // a single long-lived connection keeps the in-memory database alive
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let driver = SqlxDriver::from_pool(pool);
    driver
        .raw(
            "CREATE TABLE widget (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                stock INTEGER
            )",
        )
        .await
        .unwrap();
    driver
}

#[tokio::test]
async fn round_trip_through_sqlite() {
    let driver = Arc::new(sqlite_driver().await);
    let orm = Orm::new(driver.clone(), Arc::new(RecordRegistry::new()));
    declare_widget(&orm);
    let widgets = orm.model("Widget").unwrap();

    let mut gear = widgets.build(json!({"name": "Gear", "stock": 3})).unwrap();
    assert_eq!(orm.save(&mut gear).await.unwrap(), SaveOutcome::Inserted(1));

    let mut cog = widgets.build(json!({"name": "Cog"})).unwrap();
    assert_eq!(orm.save(&mut cog).await.unwrap(), SaveOutcome::Inserted(2));

    let found = widgets
        .find_by_id(1, &QueryOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("name"), Some(&json!("Gear")));
    assert_eq!(found.get("stock"), Some(&json!(3)));
    assert!(!found.is_dirty());

    assert_eq!(widgets.find_by_id(999, &QueryOptions::default()).await.unwrap(), None);

    let mut found = found;
    found.set("stock", 10).unwrap();
    assert_eq!(orm.save(&mut found).await.unwrap(), SaveOutcome::Updated(1));
    assert!(!found.is_dirty());

    let by_name = widgets
        .find_all(&QueryOptions::new().order("name ASC"))
        .await
        .unwrap();
    let names: Vec<_> = by_name.iter().filter_map(|w| w.get("name").cloned()).collect();
    assert_eq!(names, vec![json!("Cog"), json!("Gear")]);

    let opts = QueryOptions::default();
    assert_eq!(widgets.count(None, &opts).await.unwrap(), Some(2));
    assert_eq!(
        widgets.count(Some(&json!({"stock": 10})), &opts).await.unwrap(),
        Some(1)
    );

    assert_eq!(widgets.delete_all(&[1, 2]).await.unwrap(), 2);
    assert_eq!(widgets.count(None, &opts).await.unwrap(), Some(0));
}

#[tokio::test]
async fn zero_row_update_against_sqlite_keeps_dirty() {
    let driver = sqlite_driver().await;
    let orm = Orm::with_driver(driver);
    declare_widget(&orm);

    let mut ghost = orm.build("Widget", json!({"id": 5})).unwrap();
    ghost.set("name", "Sprocket").unwrap();

    assert_eq!(orm.save(&mut ghost).await.unwrap(), SaveOutcome::Updated(0));
    assert!(ghost.dirty().contains("name"));
}

#[tokio::test]
async fn dry_run_does_not_touch_sqlite() {
    let driver = sqlite_driver().await;
    let orm = Orm::with_driver(driver);
    declare_widget(&orm);

    let nail = orm.build("Widget", json!({"name": "Nail"})).unwrap();
    let statement = orm.explain_save(&nail).await.unwrap().unwrap();
    assert_eq!(
        statement.to_sql().sql,
        "INSERT INTO \"widget\" (\"name\") VALUES ($1) RETURNING \"id\""
    );

    let widgets = orm.model("Widget").unwrap();
    assert_eq!(widgets.count(None, &QueryOptions::default()).await.unwrap(), Some(0));
}
