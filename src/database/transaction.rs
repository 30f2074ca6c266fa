//! Atomic multi-statement transactions.

use serde::{Deserialize, Serialize};

use super::{decode_rows, default_kind, Database, ModificationResult};
use crate::classify::{classify, Requirement};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::worker::protocol::Row;

const BEGIN: &str = "BEGIN TRANSACTION";
const COMMIT: &str = "COMMIT";
const ROLLBACK: &str = "ROLLBACK";

/// Which typed operation runs a transaction statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// Like `read_many`; yields rows.
    Query,
    /// Like `mutate`; yields a [`ModificationResult`].
    Execute,
    /// Like `run`; yields nothing.
    Run,
}

/// One statement of a transaction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default, rename = "parameters", deserialize_with = "deserialize_params")]
    pub params: Params,
    /// Declared kind; derived from the SQL when absent.
    #[serde(default, rename = "type")]
    pub kind: Option<StatementKind>,
}

impl Statement {
    /// A statement whose kind is derived from its SQL.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::None,
            kind: None,
        }
    }

    /// A statement run like `read_many`.
    pub fn query(sql: impl Into<String>) -> Self {
        Self::new(sql).with_kind(StatementKind::Query)
    }

    /// A statement run like `mutate`.
    pub fn execute(sql: impl Into<String>) -> Self {
        Self::new(sql).with_kind(StatementKind::Execute)
    }

    /// A statement run like `run`.
    pub fn run(sql: impl Into<String>) -> Self {
        Self::new(sql).with_kind(StatementKind::Run)
    }

    /// Bind parameters.
    pub fn with_params(mut self, params: impl Into<Params>) -> Self {
        self.params = params.into();
        self
    }

    /// Declare the kind explicitly.
    pub fn with_kind(mut self, kind: StatementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// The kind this statement runs as.
    pub fn effective_kind(&self) -> StatementKind {
        self.kind.unwrap_or_else(|| default_kind(classify(&self.sql)))
    }
}

fn deserialize_params<'de, D>(deserializer: D) -> std::result::Result<Params, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let json = serde_json::Value::deserialize(deserializer)?;
    Params::from_json(&json).map_err(serde::de::Error::custom)
}

/// Result of one transaction statement, at the same index as the statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatementResult {
    Rows(Vec<Row>),
    Modification(ModificationResult),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Idle,
    Began,
    Executing(usize),
    Committing,
    Committed,
    RolledBack,
}

impl Database {
    /// Run `statements` atomically, in order.
    ///
    /// Statements are sent one at a time; statement N+1 is not sent before
    /// statement N has settled. If any statement (or the commit) fails, the
    /// transaction is rolled back and the failure is returned wrapped in
    /// [`Error::Transaction`]. A failing rollback never replaces the original
    /// failure; it is attached as the suppressed error instead.
    ///
    /// Requests issued concurrently on the same session while a transaction
    /// is running join it.
    pub async fn transaction(&self, statements: Vec<Statement>) -> Result<Vec<StatementResult>> {
        if statements.is_empty() {
            return Err(Error::Validation(
                "a transaction needs at least one statement".to_string(),
            ));
        }
        self.ensure_open()?;

        let mut state = TransactionState::Idle;
        self.control(BEGIN).await?;
        state = advance(state, TransactionState::Began);

        let mut results = Vec::with_capacity(statements.len());
        for (index, statement) in statements.into_iter().enumerate() {
            state = advance(state, TransactionState::Executing(index));
            match self.execute_statement(statement).await {
                Ok(result) => results.push(result),
                Err(e) => return Err(self.abort(state, e).await),
            }
        }

        state = advance(state, TransactionState::Committing);
        if let Err(e) = self.control(COMMIT).await {
            return Err(self.abort(state, e).await);
        }
        advance(state, TransactionState::Committed);

        Ok(results)
    }

    async fn execute_statement(&self, statement: Statement) -> Result<StatementResult> {
        let kind = statement.effective_kind();
        let Statement { sql, params, .. } = statement;

        match kind {
            StatementKind::Query => {
                let result = self
                    .dispatch("transaction query", Some(Requirement::Read), &sql, params, true)
                    .await?;
                Ok(StatementResult::Rows(decode_rows(
                    result.result_rows.unwrap_or_default(),
                )?))
            }
            StatementKind::Execute => {
                let result = self
                    .dispatch("transaction execute", Some(Requirement::Mutation), &sql, params, false)
                    .await?;
                Ok(StatementResult::Modification(ModificationResult::from(&result)))
            }
            StatementKind::Run => {
                self.dispatch("transaction run", Some(Requirement::NotRead), &sql, params, false)
                    .await?;
                Ok(StatementResult::Done)
            }
        }
    }

    /// Roll back after `error`, keeping `error` as the primary failure.
    async fn abort(&self, state: TransactionState, error: Error) -> Error {
        let failed_statement = match state {
            TransactionState::Executing(index) => Some(index),
            _ => None,
        };
        tracing::debug!(?failed_statement, error = %error, "rolling back transaction");

        let rollback = match self.control(ROLLBACK).await {
            Ok(()) => {
                advance(state, TransactionState::RolledBack);
                None
            }
            Err(rollback_error) => {
                tracing::warn!(
                    ?failed_statement,
                    error = %error,
                    rollback_error = %rollback_error,
                    "rollback failed"
                );
                Some(Box::new(rollback_error))
            }
        };

        Error::Transaction {
            source: Box::new(error),
            rollback,
        }
    }

    /// Send a transaction control statement, skipping the category check.
    async fn control(&self, sql: &'static str) -> Result<()> {
        self.dispatch("transaction", None, sql, Params::None, false)
            .await
            .map(|_| ())
    }
}

fn advance(from: TransactionState, to: TransactionState) -> TransactionState {
    tracing::trace!(?from, ?to, "transaction state");
    to
}
