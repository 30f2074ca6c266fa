//! Statement classification as seen by the typed operations.

use opfs_sql::{classify, Category, Requirement};

#[test]
fn test_every_keyword_family() {
    let cases = [
        ("SELECT * FROM users", Category::Read),
        ("insert into users (name) values ('a')", Category::Insert),
        ("Update users SET name = 'b'", Category::Update),
        ("delete from users", Category::Delete),
        ("CREATE INDEX idx ON users (name)", Category::SchemaChange),
        ("drop table users", Category::SchemaChange),
        ("ALTER TABLE users ADD COLUMN age INTEGER", Category::SchemaChange),
        ("BEGIN TRANSACTION", Category::Other),
        ("PRAGMA journal_mode", Category::Other),
        ("WITH x AS (SELECT 1) SELECT * FROM x", Category::Other),
    ];

    for (sql, expected) in cases {
        assert_eq!(classify(sql), expected, "classifying {sql:?}");
    }
}

#[test]
fn test_leading_whitespace_is_ignored() {
    assert_eq!(classify("\n\t  select 1"), Category::Read);
    assert_eq!(classify("\r\nDELETE FROM t"), Category::Delete);
}

#[test]
fn test_classification_is_total() {
    for sql in ["", " ", ";", "--comment\nSELECT 1", "42", "🦀 select"] {
        assert_eq!(classify(sql), Category::Other, "classifying {sql:?}");
    }
}

#[test]
fn test_operations_admit_expected_categories() {
    let all = [
        Category::Read,
        Category::Insert,
        Category::Update,
        Category::Delete,
        Category::SchemaChange,
        Category::Other,
    ];

    let admitted = |requirement: Requirement| -> Vec<Category> {
        all.into_iter().filter(|c| requirement.admits(*c)).collect()
    };

    assert_eq!(admitted(Requirement::Read), vec![Category::Read]);
    assert_eq!(
        admitted(Requirement::Mutation),
        vec![Category::Insert, Category::Update, Category::Delete]
    );
    assert_eq!(
        admitted(Requirement::NotRead),
        vec![
            Category::Insert,
            Category::Update,
            Category::Delete,
            Category::SchemaChange,
            Category::Other,
        ]
    );
}
