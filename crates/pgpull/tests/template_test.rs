//! Query template integration tests

use std::io::Write;

use pgpull::prelude::*;

#[test]
fn test_template_loaded_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "SELECT id, total\nFROM orders\nWHERE customer_id IN ($IDS)\n  AND order_date BETWEEN $START_DATE AND $END_DATE"
    )
    .unwrap();

    let sql = QueryTemplate::from_file(file.path())
        .unwrap()
        .bind_list("$IDS", &[7, 8, 9])
        .bind_date_range("2026-01-01", "2026-03-31")
        .render()
        .unwrap();

    assert!(sql.contains("IN (7,8,9)"));
    assert!(sql.contains("BETWEEN '2026-01-01' AND '2026-03-31'"));
}

#[test]
fn test_missing_file_is_a_template_error() {
    let err = QueryTemplate::from_file("/nonexistent/query.sql").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Template);
    assert!(err.to_string().contains("/nonexistent/query.sql"));
}

#[test]
fn test_forgotten_binding_surfaces_before_execution() {
    let err = QueryTemplate::from_sql("SELECT * FROM t WHERE id IN ($IDS) AND d > $START_DATE")
        .bind_list("$IDS", &["a", "b"])
        .render()
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("$START_DATE"));
    assert!(!message.contains("$IDS"));
}

#[test]
fn test_string_list_binding_quotes_and_escapes() {
    let sql = QueryTemplate::from_sql("SELECT * FROM t WHERE name IN ($NAMES)")
        .bind_list("$NAMES", &["O'Brien", "Smith"])
        .render()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM t WHERE name IN ('O''Brien','Smith')");
}

#[test]
fn test_scalar_binding() {
    let sql = QueryTemplate::from_sql("SELECT * FROM t WHERE id = $ID AND region = $REGION")
        .bind("$ID", 42)
        .bind("$REGION", "eu-west")
        .render()
        .unwrap();
    assert_eq!(sql, "SELECT * FROM t WHERE id = 42 AND region = 'eu-west'");
}
