//! Filter conditions and sort rules rendered as warehouse SQL.

use serde::{Deserialize, Serialize};

use crate::warehouse::quote;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCondition {
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    In,
    Like,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    String(String),
    Number(f64),
    Range([String; 2]),
    StringArray(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortRule {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

fn sanitize_sql_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "''")
}

fn format_number(n: f64) -> String {
    if n == n.floor() && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn comparison(op: FilterOp) -> Option<&'static str> {
    match op {
        FilterOp::Eq => Some("="),
        FilterOp::Neq => Some("!="),
        FilterOp::Gt => Some(">"),
        FilterOp::Gte => Some(">="),
        FilterOp::Lt => Some("<"),
        FilterOp::Lte => Some("<="),
        _ => None,
    }
}

impl FilterCondition {
    pub fn new(column: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    /// Render as a predicate. Returns `None` when the operator and value
    /// shapes do not match.
    pub fn to_sql(&self) -> Option<String> {
        let col = quote(&self.column);
        let sql = match (self.op, &self.value) {
            (op, FilterValue::String(v)) if comparison(op).is_some() => {
                format!("{} {} '{}'", col, comparison(op)?, sanitize_sql_string(v))
            }
            (op, FilterValue::Number(v)) if comparison(op).is_some() => {
                format!("{} {} {}", col, comparison(op)?, format_number(*v))
            }
            (FilterOp::Between, FilterValue::Range([from, to])) => format!(
                "{} BETWEEN '{}' AND '{}'",
                col,
                sanitize_sql_string(from),
                sanitize_sql_string(to)
            ),
            (FilterOp::In, FilterValue::StringArray(vals)) if !vals.is_empty() => {
                let list = vals
                    .iter()
                    .map(|v| format!("'{}'", sanitize_sql_string(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} IN ({})", col, list)
            }
            // Two-element lists deserialize as a range.
            (FilterOp::In, FilterValue::Range([a, b])) => format!(
                "{} IN ('{}', '{}')",
                col,
                sanitize_sql_string(a),
                sanitize_sql_string(b)
            ),
            (FilterOp::Like, FilterValue::String(v)) => {
                format!("{} LIKE '{}'", col, sanitize_sql_string(v))
            }
            _ => return None,
        };
        Some(sql)
    }
}

/// ` WHERE a AND b`, or an empty string when there is nothing to filter.
pub fn build_where_clause(conditions: &[FilterCondition]) -> Result<String, String> {
    if conditions.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(conditions.len());
    for c in conditions {
        match c.to_sql() {
            Some(sql) => parts.push(sql),
            None => {
                return Err(format!(
                    "filter on '{}' has a value that does not fit {:?}",
                    c.column, c.op
                ))
            }
        }
    }
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

/// ` ORDER BY a ASC, b DESC`, or an empty string.
pub fn build_order_clause(rules: &[SortRule]) -> String {
    if rules.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = rules
        .iter()
        .map(|r| {
            format!(
                "{} {}",
                quote(&r.column),
                if r.descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fc(column: &str, op: FilterOp, value: FilterValue) -> FilterCondition {
        FilterCondition::new(column, op, value)
    }

    fn s(v: &str) -> FilterValue {
        FilterValue::String(v.to_string())
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(fc("status", FilterOp::Eq, s("active")).to_sql().unwrap(), "`status` = 'active'");
        assert_eq!(fc("id", FilterOp::Neq, FilterValue::Number(0.0)).to_sql().unwrap(), "`id` != 0");
        assert_eq!(fc("amount", FilterOp::Gt, FilterValue::Number(100.0)).to_sql().unwrap(), "`amount` > 100");
        assert_eq!(fc("price", FilterOp::Lte, FilterValue::Number(19.99)).to_sql().unwrap(), "`price` <= 19.99");
        assert_eq!(fc("d", FilterOp::Gte, s("2024-06-01")).to_sql().unwrap(), "`d` >= '2024-06-01'");
    }

    #[test]
    fn test_between_in_like() {
        let between = fc(
            "invoice_date",
            FilterOp::Between,
            FilterValue::Range(["2024-01-01".to_string(), "2024-01-31".to_string()]),
        );
        assert_eq!(
            between.to_sql().unwrap(),
            "`invoice_date` BETWEEN '2024-01-01' AND '2024-01-31'"
        );
        let in_list = fc(
            "region",
            FilterOp::In,
            FilterValue::StringArray(vec!["eu".to_string(), "us".to_string()]),
        );
        assert_eq!(in_list.to_sql().unwrap(), "`region` IN ('eu', 'us')");
        assert_eq!(fc("name", FilterOp::Like, s("A%")).to_sql().unwrap(), "`name` LIKE 'A%'");
    }

    #[test]
    fn test_quotes_are_escaped() {
        assert_eq!(
            fc("name", FilterOp::Eq, s("O'Brien")).to_sql().unwrap(),
            "`name` = 'O''Brien'"
        );
        assert_eq!(fc("we`ird", FilterOp::Eq, s("x")).to_sql().unwrap(), "`we``ird` = 'x'");
    }

    #[test]
    fn test_mismatched_value_is_rejected() {
        assert!(fc("a", FilterOp::Between, s("x")).to_sql().is_none());
        assert!(fc("a", FilterOp::In, FilterValue::StringArray(vec![])).to_sql().is_none());
        assert!(build_where_clause(&[fc("a", FilterOp::Like, FilterValue::Number(1.0))]).is_err());
    }

    #[test]
    fn test_where_clause_joins_with_and() {
        assert_eq!(build_where_clause(&[]).unwrap(), "");
        let clause = build_where_clause(&[
            fc("a", FilterOp::Eq, FilterValue::Number(1.0)),
            fc("b", FilterOp::Lt, s("z")),
        ])
        .unwrap();
        assert_eq!(clause, " WHERE `a` = 1 AND `b` < 'z'");
    }

    #[test]
    fn test_order_clause() {
        assert_eq!(build_order_clause(&[]), "");
        let rules = vec![
            SortRule { column: "ts".to_string(), descending: true },
            SortRule { column: "id".to_string(), descending: false },
        ];
        assert_eq!(build_order_clause(&rules), " ORDER BY `ts` DESC, `id` ASC");
    }

    #[test]
    fn test_deserialize_untagged_values() {
        let json = r#"[
            {"column": "a", "op": "between", "value": ["1", "9"]},
            {"column": "b", "op": "in", "value": ["x", "y", "z"]},
            {"column": "c", "op": "gt", "value": 3}
        ]"#;
        let filters: Vec<FilterCondition> = serde_json::from_str(json).unwrap();
        assert!(matches!(filters[0].value, FilterValue::Range(_)));
        assert!(matches!(filters[1].value, FilterValue::StringArray(_)));
        assert!(matches!(filters[2].value, FilterValue::Number(_)));
    }
}
