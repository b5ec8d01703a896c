// src/connect/statement.rs

use crate::connect::session::{Row, Session};
use crate::connect::{ConnectError, ConnectResult};
use std::fmt;

/// SQL statement families a session helper accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Ddl,
    Dml,
    Tcl,
    Dcl,
    Dql,
}

impl StatementKind {
    /// Leading keywords accepted for each family. Some keywords (`create`,
    /// `show`, ...) legitimately belong to more than one.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            StatementKind::Ddl => &[
                "create", "drop", "alter", "truncate", "delete", "replace", "rename", "copy",
                "clone", "show", "desc", "undrop", "set", "unset",
            ],
            StatementKind::Dml => &["insert", "update", "delete", "merge", "call", "explain"],
            StatementKind::Tcl => &["begin", "commit", "rollback", "savepoint", "release"],
            StatementKind::Dcl => &[
                "grant", "revoke", "create", "drop", "alter", "use", "show", "desc", "set", "unset",
            ],
            StatementKind::Dql => &["select", "with"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Ddl => "DDL",
            StatementKind::Dml => "DML",
            StatementKind::Tcl => "TCL",
            StatementKind::Dcl => "DCL",
            StatementKind::Dql => "DQL",
        }
    }

    /// Whether `sql` starts with one of this family's keywords.
    pub fn accepts(&self, sql: &str) -> bool {
        let first = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        self.keywords().contains(&first.as_str())
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs `sql` if it belongs to `kind`.
///
/// # Errors
/// `InvalidStatement` if the leading keyword does not match; otherwise any session error.
pub fn execute(session: &dyn Session, kind: StatementKind, sql: &str) -> ConnectResult<Vec<Row>> {
    if !kind.accepts(sql) {
        return Err(ConnectError::InvalidStatement {
            kind: kind.to_string(),
            statement: sql.to_string(),
        });
    }
    log::debug!("Executing {} statement: {}", kind, sql);
    session.sql(sql)
}

pub fn ddl(session: &dyn Session, sql: &str) -> ConnectResult<Vec<Row>> {
    execute(session, StatementKind::Ddl, sql)
}

pub fn dml(session: &dyn Session, sql: &str) -> ConnectResult<Vec<Row>> {
    execute(session, StatementKind::Dml, sql)
}

pub fn tcl(session: &dyn Session, sql: &str) -> ConnectResult<Vec<Row>> {
    execute(session, StatementKind::Tcl, sql)
}

pub fn dcl(session: &dyn Session, sql: &str) -> ConnectResult<Vec<Row>> {
    execute(session, StatementKind::Dcl, sql)
}

pub fn dql(session: &dyn Session, sql: &str) -> ConnectResult<Vec<Row>> {
    execute(session, StatementKind::Dql, sql)
}
