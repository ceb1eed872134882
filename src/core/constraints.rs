//! CHECK clause parsing
//!
//! Catalogs report CHECK constraints as free text in each dialect's own style:
//! `price >= 0`, `((status)::text = ANY (ARRAY['a'::text, 'b'::text]))`,
//! `` (`status` in (_utf8mb4'a',_utf8mb4'b')) `` or `([state]='x' OR [state]='y')`.
//! These helpers pull out the facts the UI needs (minimum, maximum, allowed
//! values) without ever executing the text.

use super::model::ColumnConstraints;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid constraint pattern {pattern}: {e}"))
}

static GTE_RE: Lazy<Regex> = Lazy::new(|| compile(r">=\s*\(?(-?\d+(?:\.\d+)?)\)?"));
// `<>` is inequality, not a bound
static GT_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?:^|[^<])>\s*\(?(-?\d+(?:\.\d+)?)\)?"));
static LTE_RE: Lazy<Regex> = Lazy::new(|| compile(r"<=\s*\(?(-?\d+(?:\.\d+)?)\)?"));
static LT_RE: Lazy<Regex> = Lazy::new(|| compile(r"<\s*\(?(-?\d+(?:\.\d+)?)\)?"));
static BETWEEN_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)between\s+\(?(-?\d+(?:\.\d+)?)\)?\s+and\s+\(?(-?\d+(?:\.\d+)?)\)?")
});
static TYPE_CAST_RE: Lazy<Regex> = Lazy::new(|| compile(r"::\w+(\s+\w+)?(\[\])?"));
static COLUMN_NAME_RE: Lazy<Regex> = Lazy::new(|| compile(r"^[a-zA-Z_][a-zA-Z0-9_]*"));
static VALID_COLUMN_RE: Lazy<Regex> = Lazy::new(|| compile(r"^[a-zA-Z_][a-zA-Z0-9_]*$"));
static OR_EQUALITY_RE: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?:\[?\w+\]?)\s*=\s*(?:N)?['"]([^'"]+)['"]"#));
static ANY_ARRAY_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?is)ANY\s*\(\s*ARRAY\s*\[(.*?)\]"));
static CHECK_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\bCHECK\s*\("));
static DANGEROUS_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(DROP|DELETE|TRUNCATE|EXEC|EXECUTE|CREATE|ALTER|GRANT|REVOKE|UNION|INSERT|UPDATE)\b")
});

const RESERVED_COLUMN_WORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "EXEC", "EXECUTE", "UNION",
    "GRANT", "REVOKE", "TRUNCATE", "MERGE", "CALL", "EXPLAIN", "LOCK", "COMMENT", "COMMIT",
    "ROLLBACK", "SAVEPOINT", "SET", "SHOW",
];

/// Numeric bounds found in a CHECK clause
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MinMax {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Values of `col IN (...)`, tolerating nested parentheses and whitespace
pub fn parse_in_clause_values(clause: &str) -> Vec<String> {
    let normalized = clause.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = normalized.to_lowercase();
    let Some(in_idx) = lower.find(" in ").or_else(|| lower.find(" in(")) else {
        return Vec::new();
    };
    let Some(open) = normalized[in_idx..].find('(') else {
        return Vec::new();
    };
    let start = in_idx + open + 1;

    let mut depth = 1;
    let mut end = None;
    for (i, c) in normalized[start..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i);
                    break;
                }
            }
            _ => {}
        }
    }
    match end {
        Some(end) if end > start => parse_value_list(&normalized[start..end]),
        _ => Vec::new(),
    }
}

/// Quoted values of a comma-separated list.
///
/// Handles `N'..'`, charset prefixes like `_utf8mb4'..'` and `::text` casts.
/// Unquoted parts are ignored.
pub fn parse_value_list(content: &str) -> Vec<String> {
    split_quoted(content)
        .into_iter()
        .filter_map(|part| {
            let mut part = part.trim();
            if part.len() > 1 && (part.starts_with('N') || part.starts_with('n')) {
                let rest = &part[1..];
                if rest.starts_with('\'') || rest.starts_with('"') {
                    part = rest;
                }
            }
            if part.starts_with('_') {
                if let Some(idx) = part.find('\'') {
                    part = &part[idx..];
                }
            }
            let cleaned = TYPE_CAST_RE.replace_all(part, "");
            let cleaned = cleaned.trim();
            let bytes = cleaned.as_bytes();
            if bytes.len() >= 2
                && ((bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
                    || (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"'))
            {
                Some(cleaned[1..cleaned.len() - 1].to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Values of `col = 'a' OR col = 'b'` chains, deduplicated in order
pub fn parse_or_clause_values(clause: &str) -> Vec<String> {
    if !clause.to_lowercase().contains(" or ") {
        return Vec::new();
    }
    let mut values: Vec<String> = Vec::new();
    for caps in OR_EQUALITY_RE.captures_iter(clause) {
        if let Some(m) = caps.get(1) {
            let value = m.as_str().to_string();
            if !values.contains(&value) {
                values.push(value);
            }
        }
    }
    values
}

/// Values of PostgreSQL's `col = ANY (ARRAY['a'::text, 'b'::text])`
pub fn parse_any_array_values(clause: &str) -> Vec<String> {
    let Some(caps) = ANY_ARRAY_RE.captures(clause) else {
        return Vec::new();
    };
    let Some(body) = caps.get(1) else {
        return Vec::new();
    };
    body.as_str()
        .split(',')
        .filter_map(|part| {
            let cleaned = TYPE_CAST_RE.replace_all(part.trim(), "");
            let cleaned = cleaned.trim().trim_matches(|c| c == '\'' || c == '"');
            if cleaned.is_empty() {
                None
            } else {
                sanitize_constraint_value(cleaned)
            }
        })
        .collect()
}

/// Minimum and maximum implied by comparison or BETWEEN operators.
///
/// Exclusive integer bounds become inclusive: `> 0` gives a minimum of 1 and
/// `< 120` a maximum of 119.
pub fn parse_min_max_constraints(clause: &str) -> MinMax {
    let mut result = MinMax::default();

    if let Some(caps) = GTE_RE.captures(clause) {
        result.min = caps.get(1).and_then(|m| m.as_str().parse().ok());
    } else if let Some(caps) = GT_RE.captures(clause) {
        if let Some(val) = first_group(&caps).and_then(|s| s.parse::<f64>().ok()) {
            result.min = Some(if val.fract() == 0.0 { val + 1.0 } else { val });
        }
    }

    if let Some(caps) = LTE_RE.captures(clause) {
        result.max = caps.get(1).and_then(|m| m.as_str().parse().ok());
    } else if let Some(caps) = LT_RE.captures(clause) {
        if let Some(val) = first_group(&caps).and_then(|s| s.parse::<f64>().ok()) {
            result.max = Some(if val.fract() == 0.0 { val - 1.0 } else { val });
        }
    }

    if clause.to_lowercase().contains("between") {
        if let Some(caps) = BETWEEN_RE.captures(clause) {
            if let Some(min) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                result.min = Some(min);
            }
            if let Some(max) = caps.get(2).and_then(|m| m.as_str().parse().ok()) {
                result.max = Some(max);
            }
        }
    }

    result
}

fn first_group<'t>(caps: &regex::Captures<'t>) -> Option<&'t str> {
    caps.iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str())
        .find(|s| !s.is_empty())
}

/// Strip casts and quotes from a constraint value; `None` for suspicious text
pub fn sanitize_constraint_value(value: &str) -> Option<String> {
    let cleaned = TYPE_CAST_RE.replace_all(value, "");
    let cleaned = cleaned.trim().trim_matches(|c| c == '\'' || c == '"');
    if cleaned.contains("--") || cleaned.contains("/*") || cleaned.contains("*/") {
        return None;
    }
    if cleaned.contains(';') || cleaned.len() > 1000 {
        return None;
    }
    if DANGEROUS_KEYWORD_RE.is_match(cleaned) {
        return None;
    }
    Some(cleaned.to_string())
}

/// Plain identifier, not a reserved statement keyword, at most 128 bytes
pub fn validate_column_name(name: &str) -> bool {
    if name.len() > 128 || !VALID_COLUMN_RE.is_match(name) {
        return false;
    }
    let upper = name.to_uppercase();
    !RESERVED_COLUMN_WORDS.contains(&upper.as_str())
}

/// Column a CHECK clause constrains.
///
/// Handles quoting (`"`, `` ` ``, `[]`), function wrappers such as
/// `length((password)::text)` and casts such as `(status)::text`.
pub fn extract_column_name_from_clause(clause: &str) -> Option<String> {
    let cleaned: String = clause
        .chars()
        .filter(|c| !matches!(c, '`' | '[' | ']' | '"'))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('(').trim_start();

    if let Some(first) = COLUMN_NAME_RE.find(cleaned) {
        let after = cleaned[first.end()..].trim_start();
        if after.starts_with('(') {
            if let Some(col) = column_inside_function(after) {
                return Some(col);
            }
        }
    }

    let head = match cleaned.find("::") {
        Some(idx) if idx > 0 => &cleaned[..idx],
        _ => cleaned,
    };
    let head = head.trim_end().trim_end_matches(')').trim();
    COLUMN_NAME_RE.find(head).map(|m| m.as_str().to_string())
}

fn column_inside_function(args: &str) -> Option<String> {
    let args = args.trim_start_matches('(');
    let args = match args.find("::") {
        Some(idx) if idx > 0 => &args[..idx],
        _ => args,
    };
    let args = args.trim_end_matches(')').trim();
    COLUMN_NAME_RE.find(args).map(|m| m.as_str().to_string())
}

/// Bodies of every `CHECK (...)` in a `CREATE TABLE` statement
pub fn extract_check_clauses(create_sql: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    for m in CHECK_KEYWORD_RE.find_iter(create_sql) {
        let start = m.end();
        let mut depth = 1;
        for (i, c) in create_sql[start..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        clauses.push(create_sql[start..start + i].trim().to_string());
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    clauses
}

/// Parse one CHECK clause and merge its facts into `constraints`
pub fn apply_check_clause(clause: &str, constraints: &mut HashMap<String, ColumnConstraints>) {
    let body = strip_check_keyword(clause);
    let Some(column) = extract_column_name_from_clause(body) else {
        return;
    };
    if !validate_column_name(&column) {
        return;
    }

    let bounds = parse_min_max_constraints(body);
    let mut values = parse_in_clause_values(body);
    if values.is_empty() {
        values = parse_any_array_values(body);
    }
    if values.is_empty() {
        values = parse_or_clause_values(body);
    }
    let values: Vec<String> = values
        .iter()
        .filter_map(|v| sanitize_constraint_value(v))
        .collect();

    if bounds.min.is_none() && bounds.max.is_none() && values.is_empty() {
        return;
    }
    let entry = constraints.entry(column).or_default();
    if bounds.min.is_some() {
        entry.check_min = bounds.min;
    }
    if bounds.max.is_some() {
        entry.check_max = bounds.max;
    }
    if !values.is_empty() {
        entry.check_values = Some(values);
    }
}

fn strip_check_keyword(clause: &str) -> &str {
    let trimmed = clause.trim();
    match trimmed.get(..5) {
        Some(head) if head.eq_ignore_ascii_case("CHECK") => trimmed[5..].trim_start(),
        _ => trimmed,
    }
}

/// Split on commas outside quotes
fn split_quoted(content: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in content.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, ',') => {
                parts.push(&content[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&content[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max_comparisons() {
        assert_eq!(
            parse_min_max_constraints("price >= 0"),
            MinMax { min: Some(0.0), max: None }
        );
        assert_eq!(
            parse_min_max_constraints("age < 120"),
            MinMax { min: None, max: Some(119.0) }
        );
        assert_eq!(
            parse_min_max_constraints("qty > 0"),
            MinMax { min: Some(1.0), max: None }
        );
        assert_eq!(
            parse_min_max_constraints("ratio < 0.5"),
            MinMax { min: None, max: Some(0.5) }
        );
        assert_eq!(
            parse_min_max_constraints("(age >= 18) AND (age <= 120)"),
            MinMax { min: Some(18.0), max: Some(120.0) }
        );
        assert_eq!(
            parse_min_max_constraints("([stock]>=(0))"),
            MinMax { min: Some(0.0), max: None }
        );
    }

    #[test]
    fn test_min_max_compact_operators() {
        assert_eq!(
            parse_min_max_constraints("age<120"),
            MinMax { min: None, max: Some(119.0) }
        );
        assert_eq!(
            parse_min_max_constraints("price>10"),
            MinMax { min: Some(11.0), max: None }
        );
        assert_eq!(
            parse_min_max_constraints("score>-5 AND score<(7)"),
            MinMax { min: Some(-4.0), max: Some(6.0) }
        );
        assert_eq!(
            parse_min_max_constraints("age < 120 AND status = 'a'"),
            MinMax { min: None, max: Some(119.0) }
        );
        assert_eq!(parse_min_max_constraints("kind<>3"), MinMax::default());
    }

    #[test]
    fn test_between() {
        assert_eq!(
            parse_min_max_constraints("rating BETWEEN 1 AND 5"),
            MinMax { min: Some(1.0), max: Some(5.0) }
        );
        assert_eq!(
            parse_min_max_constraints("temp between -10 and 40"),
            MinMax { min: Some(-10.0), max: Some(40.0) }
        );
    }

    #[test]
    fn test_in_clause_variants() {
        assert_eq!(
            parse_in_clause_values("status IN ('active', 'inactive')"),
            vec!["active", "inactive"]
        );
        assert_eq!(
            parse_in_clause_values("[kind] IN (N'a', N'b')"),
            vec!["a", "b"]
        );
        assert_eq!(
            parse_in_clause_values("(`status` in (_utf8mb4'on',_utf8mb4'off'))"),
            vec!["on", "off"]
        );
        assert_eq!(
            parse_in_clause_values("status\n  IN\n ('x'::text,\n 'y'::character varying)"),
            vec!["x", "y"]
        );
        assert_eq!(parse_in_clause_values("price >= 0"), Vec::<String>::new());
    }

    #[test]
    fn test_or_clause_dedup() {
        assert_eq!(
            parse_or_clause_values("([state]='Pending' OR [state]='Shipped' OR [state]='Pending')"),
            vec!["Pending", "Shipped"]
        );
        assert!(parse_or_clause_values("state = 'x'").is_empty());
    }

    #[test]
    fn test_any_array() {
        assert_eq!(
            parse_any_array_values(
                "((status)::text = ANY ((ARRAY['active'::character varying, 'archived'::character varying])::text[]))"
            ),
            vec!["active", "archived"]
        );
    }

    #[test]
    fn test_extract_column_name() {
        assert_eq!(extract_column_name_from_clause("price >= 0").as_deref(), Some("price"));
        assert_eq!(
            extract_column_name_from_clause("((status)::text = ANY (ARRAY['a'::text]))").as_deref(),
            Some("status")
        );
        assert_eq!(
            extract_column_name_from_clause("length((password)::text) >= 8").as_deref(),
            Some("password")
        );
        assert_eq!(
            extract_column_name_from_clause("(`qty` > 0)").as_deref(),
            Some("qty")
        );
        assert_eq!(
            extract_column_name_from_clause("([stock]>=(0))").as_deref(),
            Some("stock")
        );
        assert_eq!(
            extract_column_name_from_clause("\"Amount\" > 0").as_deref(),
            Some("Amount")
        );
    }

    #[test]
    fn test_sanitize_and_validate() {
        assert_eq!(sanitize_constraint_value("'active'::text").as_deref(), Some("active"));
        assert_eq!(sanitize_constraint_value("x; DROP TABLE t"), None);
        assert_eq!(sanitize_constraint_value("a -- b"), None);
        assert_eq!(sanitize_constraint_value("union all"), None);
        assert_eq!(sanitize_constraint_value("updated_at").as_deref(), Some("updated_at"));

        assert!(validate_column_name("price"));
        assert!(validate_column_name("offset"));
        assert!(!validate_column_name("drop"));
        assert!(!validate_column_name("1abc"));
        assert!(!validate_column_name("a-b"));
    }

    #[test]
    fn test_extract_check_clauses_nested() {
        let sql = "CREATE TABLE p (id INTEGER, price DECIMAL(10,2) CHECK (price >= 0), \
                   status TEXT CHECK (status IN ('a', 'b')), CONSTRAINT c check (length(name) > 2))";
        assert_eq!(
            extract_check_clauses(sql),
            vec!["price >= 0", "status IN ('a', 'b')", "length(name) > 2"]
        );
    }

    #[test]
    fn test_apply_check_clause() {
        let mut constraints = HashMap::new();
        apply_check_clause("CHECK ((age >= 18) AND (age <= 120))", &mut constraints);
        apply_check_clause("status IN ('a', 'b')", &mut constraints);
        apply_check_clause("drop > 1", &mut constraints);

        let age = &constraints["age"];
        assert_eq!(age.check_min, Some(18.0));
        assert_eq!(age.check_max, Some(120.0));
        assert_eq!(
            constraints["status"].check_values,
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(!constraints.contains_key("drop"));
    }
}
