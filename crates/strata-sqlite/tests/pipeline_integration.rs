//! End-to-end tests: compose, render, run against SQLite, bind

use once_cell::sync::Lazy;
use std::sync::Arc;
use strata_query::bind::{Bind, RecordShape, Shape};
use strata_query::quote::{constant, input, lambda, object, param, source};
use strata_query::{
    from, Catalog, ComposeError, Entity, ExecuteError, Inputs, Outcome, Query, QueryError,
    TableModel, TranslateError, Value, ValueType,
};
use strata_sqlite::{session_for, SqliteConfig, SqliteExecutor, SqlitePool};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const SCHEMA: &str = r#"
CREATE TABLE "User" ("Id" INTEGER PRIMARY KEY, "Name" TEXT NOT NULL);
CREATE TABLE "Order" ("Id" INTEGER PRIMARY KEY, "UserId" INTEGER NOT NULL, "Total" REAL NOT NULL);
"#;

static USER_TABLE: Lazy<Arc<TableModel>> = Lazy::new(|| {
    Arc::new(
        TableModel::new("User")
            .column("Id", ValueType::Integer)
            .column("Name", ValueType::Text)
            .primary_key(["Id"]),
    )
});

static ORDER_TABLE: Lazy<Arc<TableModel>> = Lazy::new(|| {
    Arc::new(
        TableModel::new("Order")
            .column("Id", ValueType::Integer)
            .column("UserId", ValueType::Integer)
            .column("Total", ValueType::Real)
            .primary_key(["Id"]),
    )
});

#[derive(Debug, Clone, PartialEq)]
struct User {
    id: i64,
    name: String,
}

impl User {
    fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

impl Bind for User {
    fn shape() -> Shape<Self> {
        Shape::Record(RecordShape::new("User").constructor(vec!["Id", "Name"], |f| {
            Ok(User {
                id: f.get("Id")?,
                name: f.get("Name")?,
            })
        }))
    }
}

impl Entity for User {
    fn table() -> Arc<TableModel> {
        Arc::clone(&USER_TABLE)
    }

    fn values(&self) -> Vec<Value> {
        vec![self.id.into(), self.name.clone().into()]
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Order {
    id: i64,
    user_id: i64,
    total: f64,
}

impl Bind for Order {
    fn shape() -> Shape<Self> {
        Shape::Record(
            RecordShape::new("Order").constructor(vec!["Id", "UserId", "Total"], |f| {
                Ok(Order {
                    id: f.get("Id")?,
                    user_id: f.get("UserId")?,
                    total: f.get("Total")?,
                })
            }),
        )
    }
}

impl Entity for Order {
    fn table() -> Arc<TableModel> {
        Arc::clone(&ORDER_TABLE)
    }

    fn values(&self) -> Vec<Value> {
        vec![self.id.into(), self.user_id.into(), self.total.into()]
    }
}

/// Projection target for join tests
#[derive(Debug, Clone, PartialEq)]
struct Purchase {
    name: String,
    total: f64,
}

impl Bind for Purchase {
    fn shape() -> Shape<Self> {
        Shape::Record(RecordShape::new("Purchase").constructor(vec!["Name", "Total"], |f| {
            Ok(Purchase {
                name: f.get("Name")?,
                total: f.get("Total")?,
            })
        }))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pool() -> SqlitePool {
    init_tracing();
    let pool = SqlitePool::memory().expect("Failed to create memory pool");
    pool.execute_batch(SCHEMA).expect("Failed to create tables");
    pool
}

fn name_is(name: &str) -> strata_query::Lambda {
    lambda(["u"], param("u").member("Name").equals(constant(name)))
}

fn none() -> (Inputs, CancellationToken) {
    (Inputs::new(), CancellationToken::new())
}

async fn seed_users(session: &strata_query::Session<SqliteExecutor>, users: &[User]) {
    let (inputs, cancel) = none();
    session
        .apply(&from::<User>().insert_range(users), &inputs, &cancel)
        .await
        .expect("Failed to seed users");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_filter_with_identity_projection() {
    let session = session_for(pool());
    seed_users(&session, &[User::new(1, "Jeremy"), User::new(2, "Ann")]).await;
    let (inputs, cancel) = none();

    let query = from::<User>()
        .filter(name_is("Jeremy"))
        .map::<User>(strata_query::Lambda::identity("u"))
        .produce();
    let commands = session.compose(query.node()).unwrap();
    let users = session.fetch(&query, &inputs, &cancel).await.unwrap();

    assert_eq!(
        commands[0].text,
        r#"SELECT "User"."Id", "User"."Name" FROM "User" WHERE ("User"."Name" = ?1)"#
    );
    assert_eq!(users, vec![User::new(1, "Jeremy")]);
}

#[tokio::test]
async fn test_single_column_projection_binds_scalars() {
    let session = session_for(pool());
    seed_users(&session, &[User::new(1, "A"), User::new(2, "B")]).await;
    let (inputs, cancel) = none();

    let ids = session
        .fetch(
            &from::<User>()
                .asc(lambda(["u"], param("u").member("Id")))
                .map::<i64>(lambda(["u"], param("u").member("Id")))
                .produce(),
            &inputs,
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_insert_range_affects_every_row() {
    let session = session_for(pool());
    let (inputs, cancel) = none();
    let query = from::<User>().insert_range(&[User::new(1, "A"), User::new(2, "B")]);

    let commands = session.compose(query.node()).unwrap();
    let affected = session.apply(&query, &inputs, &cancel).await.unwrap();

    assert_eq!(
        commands[0].text,
        r#"INSERT INTO "User" ("Id", "Name") VALUES (?1, ?2), (?3, ?4)"#
    );
    let values: Vec<Value> = commands[0]
        .resolve(&inputs)
        .unwrap()
        .into_iter()
        .map(|p| p.value)
        .collect();
    assert_eq!(
        values,
        vec![Value::Integer(1), "A".into(), Value::Integer(2), "B".into()]
    );
    assert_eq!(affected, 2);
}

#[tokio::test]
async fn test_take_on_empty_table_returns_no_rows() {
    let session = session_for(pool());
    let (inputs, cancel) = none();

    let users = session
        .fetch(
            &from::<User>().filter(name_is("x")).take(2).produce(),
            &inputs,
            &cancel,
        )
        .await
        .unwrap();

    assert!(users.is_empty());
}

#[tokio::test]
async fn test_unsupported_method_names_the_call() {
    let session = session_for(pool());
    let (inputs, cancel) = none();
    let query = from::<User>()
        .filter(lambda(
            ["u"],
            param("u").member("Name").call("is_match", vec![constant("^J")]),
        ))
        .produce();

    let err = session.fetch(&query, &inputs, &cancel).await.unwrap_err();

    match err {
        QueryError::Compose(ComposeError::Translate(TranslateError::UnsupportedConstruct {
            kind,
            node,
        })) => {
            assert_eq!(kind, "call `is_match`/1");
            assert_eq!(node, r#"u.Name.is_match("^J")"#);
        }
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================================
// Command ordering and mutation pipelines
// ============================================================================

#[tokio::test]
async fn test_insert_then_read_depends_on_order() {
    let pool = pool();
    let session = session_for(pool.clone());
    let (inputs, cancel) = none();
    let query = from::<User>()
        .insert(&User::new(7, "Jeremy"))
        .filter(name_is("Jeremy"))
        .produce();
    let commands = session.compose(query.node()).unwrap();
    assert_eq!(commands.len(), 2);

    // The read alone, before the insert, sees nothing
    let early = session.run(&commands[1..], &inputs, &cancel).await.unwrap();
    assert!(matches!(early, Outcome::Rows(ref rows) if rows.is_empty()));

    let users = session.fetch(&query, &inputs, &cancel).await.unwrap();
    assert_eq!(users, vec![User::new(7, "Jeremy")]);
}

#[tokio::test]
async fn test_update_then_count() {
    let session = session_for(pool());
    seed_users(&session, &[User::new(1, "A"), User::new(2, "B"), User::new(3, "B")]).await;
    let (_, cancel) = none();

    let renamed = from::<User>()
        .filter(lambda(
            ["u"],
            param("u").member("Name").equals(input("old", ValueType::Text)),
        ))
        .update(lambda(["u"], object([("Name", constant("C"))])));
    let affected = session
        .apply(&renamed, &Inputs::new().with("old", "B"), &cancel)
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let remaining = session
        .count(
            &from::<User>().filter(name_is("C")).count(),
            &Inputs::new(),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(remaining, 2);
}

#[tokio::test]
async fn test_paged_count_and_sorted_page() {
    let session = session_for(pool());
    let users: Vec<User> = (1..=5).map(|i| User::new(i, &format!("U{}", i))).collect();
    seed_users(&session, &users).await;
    let (inputs, cancel) = none();

    let page = session
        .fetch(
            &from::<User>()
                .desc(lambda(["u"], param("u").member("Id")))
                .skip(1)
                .take(2)
                .produce(),
            &inputs,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(page, vec![User::new(4, "U4"), User::new(3, "U3")]);

    let skipped = session
        .count(&from::<User>().skip(3).count(), &inputs, &cancel)
        .await
        .unwrap();
    assert_eq!(skipped, 2);
}

#[tokio::test]
async fn test_join_projection() {
    let session = session_for(pool());
    seed_users(&session, &[User::new(1, "A"), User::new(2, "B")]).await;
    let (inputs, cancel) = none();
    session
        .apply(
            &from::<Order>().insert_range(&[
                Order { id: 10, user_id: 1, total: 5.0 },
                Order { id: 11, user_id: 2, total: 50.0 },
                Order { id: 12, user_id: 2, total: 1.5 },
            ]),
            &inputs,
            &cancel,
        )
        .await
        .unwrap();

    let query: Query<Purchase> = from::<User>()
        .join(
            &from::<Order>(),
            lambda(
                ["u", "o"],
                param("u").member("Id").equals(param("o").member("UserId")),
            ),
        )
        .filter(lambda(["u", "o"], param("o").member("Total").gt(2.0)))
        .asc(lambda(["u", "o"], param("o").member("Total")))
        .map(lambda(
            ["u", "o"],
            object([
                ("Name", param("u").member("Name")),
                ("Total", param("o").member("Total")),
            ]),
        ));

    let purchases = session.fetch(&query.produce(), &inputs, &cancel).await.unwrap();

    assert_eq!(
        purchases,
        vec![
            Purchase { name: "A".to_string(), total: 5.0 },
            Purchase { name: "B".to_string(), total: 50.0 },
        ]
    );
}

#[tokio::test]
async fn test_quoted_sequence_through_catalog() {
    let mut catalog = Catalog::new();
    catalog.register::<User>();
    let session = session_for(pool()).with_schema(Arc::new(catalog));
    seed_users(
        &session,
        &[User::new(1, "Jeremy"), User::new(2, "Jane"), User::new(3, "Bob")],
    )
    .await;
    let (inputs, cancel) = none();

    let query: Query<User> = Query::quoted(
        source("User")
            .where_(lambda(["u"], param("u").member("Name").starts_with("J")))
            .order_by_descending(lambda(["u"], param("u").member("Name")))
            .take(5),
    );
    let users = session.fetch(&query.produce(), &inputs, &cancel).await.unwrap();

    assert_eq!(users, vec![User::new(1, "Jeremy"), User::new(2, "Jane")]);
}

#[tokio::test]
async fn test_like_wildcards_in_needle_are_not_escaped() {
    let session = session_for(pool());
    seed_users(&session, &[User::new(1, "100%"), User::new(2, "1000")]).await;
    let (inputs, cancel) = none();

    let matched = session
        .fetch(
            &from::<User>()
                .filter(lambda(["u"], param("u").member("Name").contains("0%")))
                .produce(),
            &inputs,
            &cancel,
        )
        .await
        .unwrap();

    // `%` in the needle acts as a wildcard
    assert_eq!(matched.len(), 2);
}

// ============================================================================
// Cancellation and persistence
// ============================================================================

#[tokio::test]
async fn test_cancelled_pipeline_runs_nothing() {
    let session = session_for(pool());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = session
        .fetch(
            &from::<User>().insert(&User::new(1, "A")).produce(),
            &Inputs::new(),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        QueryError::Execute(ExecuteError::Cancelled { completed: 0, total: 2 })
    ));
    let count = session
        .count(&from::<User>().count(), &Inputs::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_file_database_persists_between_sessions() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = SqliteConfig::new(dir.path().join("strata.db"));
    let (inputs, cancel) = none();

    {
        let session = strata_sqlite::open_session(config.clone()).unwrap();
        session.executor().pool().execute_batch(SCHEMA).unwrap();
        session
            .apply(&from::<User>().insert(&User::new(1, "Kept")), &inputs, &cancel)
            .await
            .unwrap();
    }

    let session = strata_sqlite::open_session(config).unwrap();
    let users = session
        .fetch(&from::<User>().produce(), &inputs, &cancel)
        .await
        .unwrap();
    assert_eq!(users, vec![User::new(1, "Kept")]);
}
