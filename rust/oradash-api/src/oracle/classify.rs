//! Lexical statement classification.
//!
//! Only the first keyword matters. Leading whitespace, `--` line comments,
//! `/* ... */` block comments (optimizer hints included) and opening
//! parentheses are skipped before the keyword is read.

use serde::Serialize;

/// What kind of statement a SQL text is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    /// Returns rows: `SELECT`, `WITH`.
    Select,
    /// Everything else, PL/SQL blocks included.
    Dml,
    /// `CREATE`, `ALTER`, `DROP`. Always autocommitted.
    Ddl,
}

/// Classify a statement by its first keyword.
#[must_use]
pub fn classify(sql: &str) -> StatementKind {
    let keyword = first_keyword(sql);
    if keyword.eq_ignore_ascii_case("SELECT") || keyword.eq_ignore_ascii_case("WITH") {
        StatementKind::Select
    } else if ["CREATE", "ALTER", "DROP"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
    {
        StatementKind::Ddl
    } else {
        StatementKind::Dml
    }
}

fn first_keyword(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.find('\n').map_or("", |i| &after[i + 1..]);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]);
        } else if let Some(after) = trimmed.strip_prefix('(') {
            rest = after;
        } else {
            rest = trimmed;
            break;
        }
    }

    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    &rest[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_forms() {
        assert_eq!(classify("SELECT * FROM dual"), StatementKind::Select);
        assert_eq!(classify("  \n\tselect 1 from dual"), StatementKind::Select);
        assert_eq!(classify("WITH t AS (SELECT 1 x FROM dual) SELECT x FROM t"), StatementKind::Select);
        assert_eq!(classify("(select 1 from dual) union (select 2 from dual)"), StatementKind::Select);
    }

    #[test]
    fn test_leading_comments_and_hints() {
        assert_eq!(classify("-- top sql\nSELECT sql_id FROM v$sql"), StatementKind::Select);
        assert_eq!(classify("/* report */ select 1 from dual"), StatementKind::Select);
        assert_eq!(
            classify("/*+ PARALLEL(4) */ SELECT count(*) FROM dba_objects"),
            StatementKind::Select
        );
        assert_eq!(classify("-- a\n/* b */\n  -- c\ncreate index i on t(c)"), StatementKind::Ddl);
    }

    #[test]
    fn test_ddl() {
        assert_eq!(classify("CREATE TABLE t (id NUMBER)"), StatementKind::Ddl);
        assert_eq!(classify("alter system flush shared_pool"), StatementKind::Ddl);
        assert_eq!(classify("Drop Table t"), StatementKind::Ddl);
    }

    #[test]
    fn test_dml_and_fallback() {
        assert_eq!(classify("INSERT INTO t VALUES (1)"), StatementKind::Dml);
        assert_eq!(classify("update t set c = 1"), StatementKind::Dml);
        assert_eq!(classify("BEGIN DBMS_STATS.GATHER_SCHEMA_STATS('HR'); END;"), StatementKind::Dml);
        assert_eq!(classify("TRUNCATE TABLE t"), StatementKind::Dml);
        assert_eq!(classify(""), StatementKind::Dml);
        assert_eq!(classify("-- only a comment"), StatementKind::Dml);
    }

    #[test]
    fn test_word_boundary() {
        assert_eq!(classify("SELECTED_ROWS := 1"), StatementKind::Dml);
        assert_eq!(classify("created_by := 1"), StatementKind::Dml);
        assert_eq!(classify("WITHDRAW"), StatementKind::Dml);
    }
}
