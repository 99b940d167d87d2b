//! Statements and field maps over the performance views shared by the
//! monitoring routes and the prefetch collector.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::{FieldMap, FieldSpec};

const WAIT_EVENTS_SQL: &str = "SELECT event, wait_class, total_waits, total_timeouts,
       time_waited, average_wait, time_waited_micro
  FROM v$system_event";

pub const WAIT_EVENT_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::text("EVENT", "event"),
    FieldSpec::text("WAIT_CLASS", "wait_class"),
    FieldSpec::int("TOTAL_WAITS", "total_waits"),
    FieldSpec::int("TOTAL_TIMEOUTS", "total_timeouts"),
    FieldSpec::int("TIME_WAITED", "time_waited"),
    FieldSpec::float("AVERAGE_WAIT", "average_wait"),
    FieldSpec::int("TIME_WAITED_MICRO", "time_waited_micro"),
]);

pub const TOP_SQL_FIELDS: FieldMap = FieldMap::new(&[
    FieldSpec::text("SQL_ID", "sql_id"),
    FieldSpec::int("PLAN_HASH_VALUE", "plan_hash_value"),
    FieldSpec::int("EXECUTIONS", "executions"),
    FieldSpec::int("ELAPSED_TIME", "elapsed_time"),
    FieldSpec::int("CPU_TIME", "cpu_time"),
    FieldSpec::int("BUFFER_GETS", "buffer_gets"),
    FieldSpec::int("DISK_READS", "disk_reads"),
    FieldSpec::int("ROWS_PROCESSED", "rows_processed"),
    FieldSpec::float("AVG_ELAPSED_MS", "avg_elapsed_ms"),
    FieldSpec::text("PARSING_SCHEMA_NAME", "parsing_schema_name"),
    FieldSpec::text("MODULE", "module"),
    FieldSpec::text("SQL_TEXT", "sql_text"),
]);

/// Wait event query, optionally narrowed to one class in SQL.
#[must_use]
pub fn wait_events_sql(include_idle: bool, by_class: bool) -> String {
    let mut conditions = Vec::new();
    if !include_idle {
        conditions.push("wait_class <> 'Idle'");
    }
    if by_class {
        conditions.push("wait_class = :1");
    }

    let mut sql = WAIT_EVENTS_SQL.to_string();
    if !conditions.is_empty() {
        sql.push_str("\n WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str("\n ORDER BY time_waited DESC");
    sql
}

fn time_waited(row: &Map<String, Value>) -> f64 {
    row.get("time_waited")
        .and_then(Value::as_f64)
        .unwrap_or(f64::NEG_INFINITY)
}

/// Apply the class filter and order by `time_waited` descending, nulls last.
#[must_use]
pub fn filter_wait_events(
    mut rows: Vec<Map<String, Value>>,
    wait_class: Option<&str>,
    include_idle: bool,
) -> Vec<Map<String, Value>> {
    rows.retain(|row| {
        let class = row.get("wait_class").and_then(Value::as_str);
        let class_ok = wait_class.is_none_or(|wanted| class == Some(wanted));
        class_ok && (include_idle || class != Some("Idle"))
    });
    rows.sort_by(|a, b| {
        time_waited(b)
            .partial_cmp(&time_waited(a))
            .unwrap_or(Ordering::Equal)
    });
    rows
}

/// Top SQL ordered by `order_by`, descending. `order_by` must be a
/// whitelisted column name.
#[must_use]
pub fn top_sql_sql(order_by: &str) -> String {
    format!(
        "SELECT * FROM (
    SELECT sql_id, plan_hash_value, executions, elapsed_time, cpu_time, buffer_gets,
           disk_reads, rows_processed,
           ROUND(elapsed_time / GREATEST(executions, 1) / 1000, 3) AS avg_elapsed_ms,
           parsing_schema_name, module, SUBSTR(sql_text, 1, 1000) AS sql_text
      FROM v$sql
     WHERE executions > 0
     ORDER BY {order_by} DESC
) WHERE ROWNUM <= :1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(class: &str, waited: Value) -> Map<String, Value> {
        let Value::Object(map) = json!({ "event": "e", "wait_class": class, "time_waited": waited }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn test_wait_events_sql_variants() {
        let sql = wait_events_sql(false, true);
        assert!(sql.contains("wait_class <> 'Idle' AND wait_class = :1"));
        assert!(sql.ends_with("ORDER BY time_waited DESC"));

        let sql = wait_events_sql(true, false);
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn test_filter_and_sort() {
        let rows = vec![
            event("User I/O", json!(10)),
            event("Commit", json!(500)),
            event("User I/O", json!(300)),
            event("User I/O", Value::Null),
            event("Idle", json!(9000)),
        ];
        let filtered = filter_wait_events(rows, Some("User I/O"), false);
        let waited: Vec<_> = filtered.iter().map(|r| r["time_waited"].clone()).collect();
        assert_eq!(waited, vec![json!(300), json!(10), Value::Null]);
    }

    #[test]
    fn test_idle_excluded_unless_asked() {
        let rows = vec![event("Idle", json!(9000)), event("Commit", json!(5))];
        assert_eq!(filter_wait_events(rows.clone(), None, false).len(), 1);
        assert_eq!(filter_wait_events(rows, None, true).len(), 2);
    }

    #[test]
    fn test_top_sql_order_clause() {
        assert!(top_sql_sql("cpu_time").contains("ORDER BY cpu_time DESC"));
    }
}
