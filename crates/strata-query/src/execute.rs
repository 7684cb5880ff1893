//! Running command lists against a database.
//!
//! The engine never talks to a database itself. An [`Executor`] runs one
//! command text with its parameters; a [`Session`] composes query trees for
//! its configured dialect and drives the resulting commands through the
//! executor in order, binding the last result.

use crate::bind::{bind_rows, Bind, RowSet};
use crate::compose::{Command, Composer, ResultKind};
use crate::config::QueryConfig;
use crate::error::{
    BindError, BoxError, ComposeResult, ExecuteError, ExecuteResult, QueryResult,
};
use crate::model::SchemaProvider;
use crate::query::{Count, Produce, Query, QueryNode};
use crate::value::{FromValue, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A parameter value with its placeholder name
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

/// Named values for [`Quoted::Input`](crate::quote::Quoted::Input) nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    values: HashMap<String, Value>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Database capability: run one command.
///
/// Implementations should stop promptly once `cancel` fires; the session also
/// stops waiting on its own.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a statement that returns no rows; returns the affected-row count
    async fn execute(
        &self,
        text: &str,
        parameters: &[Parameter],
        cancel: &CancellationToken,
    ) -> Result<u64, BoxError>;

    /// Run a statement that returns rows
    async fn query(
        &self,
        text: &str,
        parameters: &[Parameter],
        cancel: &CancellationToken,
    ) -> Result<RowSet, BoxError>;
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for Arc<E> {
    async fn execute(
        &self,
        text: &str,
        parameters: &[Parameter],
        cancel: &CancellationToken,
    ) -> Result<u64, BoxError> {
        (**self).execute(text, parameters, cancel).await
    }

    async fn query(
        &self,
        text: &str,
        parameters: &[Parameter],
        cancel: &CancellationToken,
    ) -> Result<RowSet, BoxError> {
        (**self).query(text, parameters, cancel).await
    }
}

/// Result of the last command of a list
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(RowSet),
    Scalar(Value),
    Affected(u64),
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rows(_) => "rows",
            Self::Scalar(_) => "a scalar",
            Self::Affected(_) => "an affected-row count",
        }
    }
}

fn unexpected(command: &Command, expected: &'static str, found: &Outcome) -> ExecuteError {
    ExecuteError::UnexpectedOutcome {
        command: command.text.clone(),
        expected,
        found: found.kind(),
    }
}

/// Composes and runs queries through one executor
pub struct Session<E> {
    executor: E,
    config: QueryConfig,
    schema: Option<Arc<dyn SchemaProvider>>,
}

impl<E: Executor> Session<E> {
    pub fn new(executor: E, config: QueryConfig) -> Self {
        Self {
            executor,
            config,
            schema: None,
        }
    }

    /// Tables for quoted sequence roots
    pub fn with_schema(mut self, schema: Arc<dyn SchemaProvider>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Commands for `root` in this session's dialect
    pub fn compose(&self, root: &QueryNode) -> ComposeResult<Vec<Command>> {
        let composer = Composer::new(self.config.dialect());
        match &self.schema {
            Some(schema) => composer.with_schema(schema.as_ref()).compose(root),
            None => composer.compose(root),
        }
    }

    /// Run `commands` in order and return the result of the last one.
    ///
    /// Cancellation is checked before each command and while waiting on the
    /// executor. Commands already completed are not rolled back.
    pub async fn run(
        &self,
        commands: &[Command],
        inputs: &Inputs,
        cancel: &CancellationToken,
    ) -> ExecuteResult<Outcome> {
        let total = commands.len();
        let mut last = None;

        for (step, command) in commands.iter().enumerate() {
            let cancelled = ExecuteError::Cancelled {
                completed: step,
                total,
            };
            if cancel.is_cancelled() {
                warn!(completed = step, total, "Query cancelled");
                return Err(cancelled);
            }

            let parameters = command.resolve(inputs)?;
            debug!(
                step,
                kind = command.statement.kind(),
                sql = %command.text,
                params = parameters.len(),
                "Running command"
            );
            if self.config.log_statements {
                info!(sql = %command.text, "Executing statement");
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(completed = step, total, "Query cancelled while running");
                    return Err(cancelled);
                }
                outcome = self.dispatch(command, &parameters, cancel) => outcome?,
            };
            last = Some(outcome);
        }

        last.ok_or(ExecuteError::EmptyCommandList)
    }

    async fn dispatch(
        &self,
        command: &Command,
        parameters: &[Parameter],
        cancel: &CancellationToken,
    ) -> ExecuteResult<Outcome> {
        let failed = |source| ExecuteError::Executor {
            command: command.text.clone(),
            source,
        };
        match command.result {
            ResultKind::AffectedCount => self
                .executor
                .execute(&command.text, parameters, cancel)
                .await
                .map(Outcome::Affected)
                .map_err(failed),
            ResultKind::Rows => self
                .executor
                .query(&command.text, parameters, cancel)
                .await
                .map(Outcome::Rows)
                .map_err(failed),
            ResultKind::Scalar => {
                let rows = self
                    .executor
                    .query(&command.text, parameters, cancel)
                    .await
                    .map_err(failed)?;
                scalar(command, rows).map(Outcome::Scalar)
            }
        }
    }

    /// Compose and run `root`
    pub async fn evaluate(
        &self,
        root: &QueryNode,
        inputs: &Inputs,
        cancel: &CancellationToken,
    ) -> QueryResult<(Vec<Command>, Outcome)> {
        let commands = self.compose(root)?;
        let outcome = self.run(&commands, inputs, cancel).await?;
        Ok((commands, outcome))
    }

    /// Fetch and bind the rows of `query`
    pub async fn fetch<T: Bind>(
        &self,
        query: &Produce<T>,
        inputs: &Inputs,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<T>> {
        let (commands, outcome) = self.evaluate(query.node(), inputs, cancel).await?;
        let last = last_command(&commands)?;
        match outcome {
            Outcome::Rows(rows) => Ok(bind_rows(rows, &last.text)?),
            other => Err(unexpected(last, "rows", &other).into()),
        }
    }

    /// Count the rows of `query`
    pub async fn count(
        &self,
        query: &Count,
        inputs: &Inputs,
        cancel: &CancellationToken,
    ) -> QueryResult<i64> {
        let (commands, outcome) = self.evaluate(query.node(), inputs, cancel).await?;
        let last = last_command(&commands)?;
        match outcome {
            Outcome::Scalar(value) => i64::from_value(value).map_err(|cause| {
                BindError::ConversionFailure {
                    column: "COUNT(*)".to_string(),
                    target: i64::TARGET,
                    cause,
                    statement: last.text.clone(),
                }
                .into()
            }),
            other => Err(unexpected(last, "a scalar", &other).into()),
        }
    }

    /// Run an insert or update query; returns the rows affected by its last command
    pub async fn apply<T>(
        &self,
        query: &Query<T>,
        inputs: &Inputs,
        cancel: &CancellationToken,
    ) -> QueryResult<u64> {
        let (commands, outcome) = self.evaluate(query.node(), inputs, cancel).await?;
        let last = last_command(&commands)?;
        match outcome {
            Outcome::Affected(n) => Ok(n),
            other => Err(unexpected(last, "an affected-row count", &other).into()),
        }
    }
}

fn last_command(commands: &[Command]) -> ExecuteResult<&Command> {
    commands.last().ok_or(ExecuteError::EmptyCommandList)
}

fn scalar(command: &Command, rows: RowSet) -> ExecuteResult<Value> {
    let columns = rows.columns.len();
    let count = rows.len();
    match rows.rows.into_iter().next() {
        Some(row) if count == 1 && columns == 1 && row.len() == 1 => {
            Ok(row.into_iter().next().unwrap_or(Value::Null))
        }
        _ => Err(ExecuteError::NotScalar {
            command: command.text.clone(),
            rows: count,
            columns,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::ColumnInfo;
    use crate::error::QueryError;
    use crate::query::fixtures::User;
    use crate::query::from;
    use crate::quote::{constant, input, lambda, object, param};
    use crate::render::DialectKind;
    use crate::value::ValueType;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Execute(String, Vec<Parameter>),
        Query(String, Vec<Parameter>),
    }

    /// Records calls; answers queries from a queue and executes with a fixed count
    #[derive(Default)]
    struct MockExecutor {
        calls: Mutex<Vec<Call>>,
        results: Mutex<VecDeque<RowSet>>,
        affected: u64,
        cancel_on_execute: Option<CancellationToken>,
        fail_queries: bool,
    }

    impl MockExecutor {
        fn answering(results: Vec<RowSet>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                affected: 1,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn execute(
            &self,
            text: &str,
            parameters: &[Parameter],
            _cancel: &CancellationToken,
        ) -> Result<u64, BoxError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Execute(text.to_string(), parameters.to_vec()));
            if let Some(token) = &self.cancel_on_execute {
                token.cancel();
            }
            Ok(self.affected)
        }

        async fn query(
            &self,
            text: &str,
            parameters: &[Parameter],
            _cancel: &CancellationToken,
        ) -> Result<RowSet, BoxError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Query(text.to_string(), parameters.to_vec()));
            if self.fail_queries {
                return Err("disk I/O error".into());
            }
            Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    /// Never answers; only cancellation ends a call
    struct StalledExecutor;

    #[async_trait]
    impl Executor for StalledExecutor {
        async fn execute(
            &self,
            _text: &str,
            _parameters: &[Parameter],
            _cancel: &CancellationToken,
        ) -> Result<u64, BoxError> {
            std::future::pending().await
        }

        async fn query(
            &self,
            _text: &str,
            _parameters: &[Parameter],
            _cancel: &CancellationToken,
        ) -> Result<RowSet, BoxError> {
            std::future::pending().await
        }
    }

    fn user_rows(rows: &[(i64, &str)]) -> RowSet {
        let mut set = RowSet::new(vec![
            ColumnInfo::new("Id", Some(ValueType::Integer)),
            ColumnInfo::new("Name", Some(ValueType::Text)),
        ]);
        for (id, name) in rows {
            set.push(vec![Value::Integer(*id), (*name).into()]);
        }
        set
    }

    fn count_rows(n: i64) -> RowSet {
        let mut set = RowSet::new(vec![ColumnInfo::new("COUNT(*)", None)]);
        set.push(vec![Value::Integer(n)]);
        set
    }

    fn session(executor: MockExecutor) -> Session<MockExecutor> {
        Session::new(executor, QueryConfig::new(DialectKind::Sqlite))
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    #[tokio::test]
    async fn test_fetch_binds_rows() {
        let session = session(MockExecutor::answering(vec![user_rows(&[(1, "Jeremy")])]));
        let query = from::<User>()
            .filter(lambda(["u"], param("u").member("Name").equals(constant("Jeremy"))))
            .produce();

        let users = session
            .fetch(&query, &Inputs::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(users, vec![User::new(1, "Jeremy")]);
        assert_eq!(
            session.executor().calls(),
            vec![Call::Query(
                r#"SELECT "User"."Id", "User"."Name" FROM "User" WHERE ("User"."Name" = ?1)"#
                    .to_string(),
                vec![Parameter {
                    name: "Name".to_string(),
                    value: "Jeremy".into()
                }]
            )]
        );
    }

    #[tokio::test]
    async fn test_count_reads_scalar() {
        let session = session(MockExecutor::answering(vec![count_rows(3)]));

        let n = session
            .count(&from::<User>().count(), &Inputs::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn test_count_rejects_multi_row_result() {
        let session = session(MockExecutor::answering(vec![user_rows(&[(1, "a"), (2, "b")])]));

        let err = session
            .count(&from::<User>().count(), &Inputs::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueryError::Execute(ExecuteError::NotScalar { rows: 2, columns: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_insert_then_read_runs_in_order() {
        let session = session(MockExecutor::answering(vec![user_rows(&[(1, "Jeremy")])]));
        let query = from::<User>().insert(&User::new(1, "Jeremy")).produce();

        let users = session
            .fetch(&query, &Inputs::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(users.len(), 1);
        let calls = session.executor().calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], Call::Execute(sql, _) if sql.starts_with("INSERT INTO")));
        assert!(matches!(&calls[1], Call::Query(sql, _) if sql.starts_with("SELECT")));
    }

    #[tokio::test]
    async fn test_apply_update_with_input() {
        let session = session(MockExecutor::answering(vec![]));
        let query = from::<User>()
            .filter(lambda(
                ["u"],
                param("u").member("Id").equals(input("id", ValueType::Integer)),
            ))
            .update(lambda(["u"], object([("Name", constant("Renamed"))])));

        let affected = session
            .apply(&query, &Inputs::new().with("id", 7), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(affected, 1);
        match &session.executor().calls()[0] {
            Call::Execute(sql, params) => {
                assert_eq!(sql, r#"UPDATE "User" SET "Name" = ?1 WHERE ("User"."Id" = ?2)"#);
                assert_eq!(params[1].value, Value::Integer(7));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_input_fails_before_executing() {
        let session = session(MockExecutor::answering(vec![]));
        let query = from::<User>()
            .filter(lambda(
                ["u"],
                param("u").member("Id").equals(input("id", ValueType::Integer)),
            ))
            .produce();

        let err = session
            .fetch(&query, &Inputs::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueryError::Execute(ExecuteError::MissingInput { ref name }) if name == "id"
        ));
        assert!(session.executor().calls().is_empty());
    }

    #[tokio::test]
    async fn test_executor_failure_carries_command_text() {
        let session = session(MockExecutor {
            fail_queries: true,
            ..Default::default()
        });

        let err = session
            .fetch(&from::<User>().produce(), &Inputs::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            QueryError::Execute(ExecuteError::Executor { command, source }) => {
                assert_eq!(command, r#"SELECT "User"."Id", "User"."Name" FROM "User""#);
                assert_eq!(source.to_string(), "disk I/O error");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_outcome_for_apply() {
        let session = session(MockExecutor::answering(vec![user_rows(&[])]));

        let err = session
            .apply(&from::<User>(), &Inputs::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueryError::Execute(ExecuteError::UnexpectedOutcome { found: "rows", .. })
        ));
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let session = session(MockExecutor::answering(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let commands = session.compose(from::<User>().produce().node()).unwrap();

        let err = session.run(&commands, &Inputs::new(), &cancel).await.unwrap_err();

        assert!(matches!(err, ExecuteError::Cancelled { completed: 0, total: 1 }));
        assert!(session.executor().calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_between_commands() {
        let cancel = CancellationToken::new();
        let session = session(MockExecutor {
            affected: 1,
            cancel_on_execute: Some(cancel.clone()),
            ..Default::default()
        });
        let commands = session
            .compose(from::<User>().insert(&User::new(1, "a")).produce().node())
            .unwrap();

        let err = session.run(&commands, &Inputs::new(), &cancel).await.unwrap_err();

        assert!(matches!(err, ExecuteError::Cancelled { completed: 1, total: 2 }));
        assert_eq!(session.executor().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_executor() {
        let session = Session::new(StalledExecutor, QueryConfig::default());
        let cancel = CancellationToken::new();
        let commands = session.compose(from::<User>().produce().node()).unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });
        let err = session.run(&commands, &Inputs::new(), &cancel).await.unwrap_err();

        assert!(matches!(err, ExecuteError::Cancelled { completed: 0, total: 1 }));
    }

    #[tokio::test]
    async fn test_empty_command_list() {
        let session = session(MockExecutor::default());

        let err = session
            .run(&[], &Inputs::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ExecuteError::EmptyCommandList));
    }

    #[test]
    fn test_inputs() {
        let mut inputs = Inputs::new().with("a", 1);
        inputs.set("b", "x");

        assert_eq!(inputs.get("a"), Some(&Value::Integer(1)));
        assert_eq!(inputs.get("b"), Some(&Value::from("x")));
        assert_eq!(inputs.get("c"), None);
    }
}
