//! SQLite-backed database handle used by the worker agent.

use std::path::{Component, Path};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, Statement};
use serde_json::{json, Value as Json};

use super::EngineRuntime;
use crate::classify::{classify, Category};
use crate::error::ErrorInfo;
use crate::worker::protocol::{ExecArgs, ExecResult, Row};

/// An open database file inside the durable store.
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Connection,
    filename: String,
}

impl SqliteDatabase {
    /// Open `filename` under the runtime's storage root, creating it if absent.
    pub fn open(runtime: &EngineRuntime, filename: &str) -> Result<Self, ErrorInfo> {
        let relative = Path::new(filename);
        let escapes = filename.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(ErrorInfo::new(format!("invalid database filename {filename:?}")));
        }

        let path = runtime.storage_root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ErrorInfo::new(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(&path).map_err(engine_error)?;
        tracing::debug!(path = %path.display(), "opened database");

        Ok(Self {
            conn,
            filename: filename.to_string(),
        })
    }

    /// Filename this database was opened with.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Run one `exec` request.
    ///
    /// Without bindings and without row collection the SQL may hold several
    /// statements and runs as a batch.
    pub fn exec(&self, args: &ExecArgs) -> Result<ExecResult, ErrorInfo> {
        let rowid_before = self.conn.last_insert_rowid();
        let bind = args.bind.as_ref().filter(|b| !is_empty_bind(b));

        let result_rows = if bind.is_none() && !args.collects_rows() {
            self.conn.execute_batch(&args.sql).map_err(engine_error)?;
            None
        } else {
            let mut stmt = self.conn.prepare(&args.sql).map_err(engine_error)?;
            if let Some(bind) = bind {
                bind_params(&mut stmt, bind)?;
            }
            let rows = collect_rows(&mut stmt).map_err(engine_error)?;
            args.collects_rows().then_some(rows)
        };

        let change_count = self.conn.changes() as u64;
        let rowid_after = self.conn.last_insert_rowid();
        let inserted = rowid_after != rowid_before
            || (classify(&args.sql) == Category::Insert && change_count > 0);

        Ok(ExecResult {
            result_rows,
            change_count: Some(change_count),
            last_insert_rowid: inserted.then_some(rowid_after),
        })
    }

    /// Close the connection.
    pub fn close(self) -> Result<(), ErrorInfo> {
        self.conn.close().map_err(|(_, e)| engine_error(e))
    }
}

/// Step the statement to completion, returning every row as an object.
fn collect_rows(stmt: &mut Statement<'_>) -> rusqlite::Result<Vec<Row>> {
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        let mut object = Row::new();
        for (i, name) in names.iter().enumerate() {
            object.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        out.push(object);
    }

    Ok(out)
}

fn bind_params(stmt: &mut Statement<'_>, bind: &Json) -> Result<(), ErrorInfo> {
    match bind {
        Json::Array(values) => {
            let expected = stmt.parameter_count();
            if values.len() != expected {
                return Err(ErrorInfo::new(format!(
                    "statement expects {expected} parameters, got {}",
                    values.len()
                )));
            }
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, from_json(value)?)
                    .map_err(engine_error)?;
            }
        }
        Json::Object(map) => {
            for (name, value) in map {
                let index = named_index(stmt, name)?.ok_or_else(|| {
                    ErrorInfo::new(format!("statement has no parameter named {name:?}"))
                })?;
                stmt.raw_bind_parameter(index, from_json(value)?)
                    .map_err(engine_error)?;
            }
        }
        other => {
            return Err(ErrorInfo::new(format!(
                "bind must be an array or object, got {other}"
            )))
        }
    }
    Ok(())
}

/// Resolve a named parameter, accepting bare names for `:`, `@` and `$` placeholders.
fn named_index(stmt: &Statement<'_>, name: &str) -> Result<Option<usize>, ErrorInfo> {
    if name.starts_with([':', '@', '$']) {
        return stmt.parameter_index(name).map_err(engine_error);
    }
    for prefix in [':', '@', '$'] {
        if let Some(index) = stmt
            .parameter_index(&format!("{prefix}{name}"))
            .map_err(engine_error)?
        {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn is_empty_bind(bind: &Json) -> bool {
    match bind {
        Json::Null => true,
        Json::Array(values) => values.is_empty(),
        Json::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn from_json(value: &Json) -> Result<SqlValue, ErrorInfo> {
    Ok(match value {
        Json::Null => SqlValue::Null,
        Json::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => SqlValue::Text(s.clone()),
        Json::Array(items) => SqlValue::Blob(
            items
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| ErrorInfo::new("blob parameters must be byte arrays"))?,
        ),
        Json::Object(_) => return Err(ErrorInfo::new("cannot bind an object")),
    })
}

fn to_json(value: ValueRef<'_>) -> Json {
    match value {
        ValueRef::Null => Json::Null,
        ValueRef::Integer(i) => Json::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        ValueRef::Text(bytes) => Json::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
    }
}

/// Convert an engine failure into wire error info, keeping SQLite's result codes.
pub(crate) fn engine_error(err: rusqlite::Error) -> ErrorInfo {
    let cause = match &err {
        rusqlite::Error::SqliteFailure(code, _) => Some(json!({
            "code": format!("{:?}", code.code),
            "extendedCode": code.extended_code,
        })),
        _ => None,
    };
    ErrorInfo {
        message: err.to_string(),
        operation: None,
        cause,
    }
}
