//! Coarse SQL statement classification used to route statements to typed operations.

use std::fmt;

/// Category of a SQL statement, decided by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// `SELECT ...`
    Read,
    /// `INSERT ...`
    Insert,
    /// `UPDATE ...`
    Update,
    /// `DELETE ...`
    Delete,
    /// `CREATE`, `DROP` or `ALTER`.
    SchemaChange,
    /// Anything else (PRAGMA, BEGIN, empty input, ...).
    Other,
}

impl Category {
    /// Whether this category belongs to the insert/update/delete group.
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Lower-case name used in messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::SchemaChange => "schema change",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which categories a typed operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Only [`Category::Read`].
    Read,
    /// Insert, update or delete.
    Mutation,
    /// Any category except [`Category::Read`].
    NotRead,
}

impl Requirement {
    /// Check whether `category` satisfies this requirement.
    pub fn admits(self, category: Category) -> bool {
        match self {
            Self::Read => category == Category::Read,
            Self::Mutation => category.is_mutation(),
            Self::NotRead => category != Category::Read,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Mutation => f.write_str("insert/update/delete"),
            Self::NotRead => f.write_str("any non-read statement"),
        }
    }
}

/// Classify a SQL statement by its leading keyword.
///
/// Total over all strings: leading whitespace is ignored, matching is
/// case-insensitive, and anything unrecognized (including empty input) is
/// [`Category::Other`].
pub fn classify(sql: &str) -> Category {
    let sql = sql.trim_start();

    // Checked in order; first match wins.
    const PREFIXES: &[(&str, Category)] = &[
        ("select", Category::Read),
        ("insert", Category::Insert),
        ("update", Category::Update),
        ("delete", Category::Delete),
        ("create", Category::SchemaChange),
        ("drop", Category::SchemaChange),
        ("alter", Category::SchemaChange),
    ];

    for (prefix, category) in PREFIXES {
        if starts_with_ignore_case(sql, prefix) {
            return *category;
        }
    }

    Category::Other
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
