//! String to native value conversion
//!
//! Callers hand the engine values as text together with a column type. The
//! [`TypeConverter`] turns that pair into a tagged [`Value`] the native adapter
//! can bind, honouring `Nullable(..)`, `LowCardinality(..)` and array wrappers
//! and letting the dialect intercept types it knows better.

use super::dialect::DialectFacts;
use super::error::{EngineError, Result};
use super::model::Record;
use super::types::{unsigned_bit_size, TypeFamily, TypeSpec};
use super::value::Value;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

static INTEGER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?\d+$").unwrap_or_else(|e| panic!("invalid integer pattern: {e}"))
});

static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$")
        .unwrap_or_else(|e| panic!("invalid decimal pattern: {e}"))
});

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap_or_else(|e| panic!("invalid uuid pattern: {e}"))
});

static WKT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(SRID=\d+;)?\s*[A-Z]+(\s+(Z|M|ZM))?\s*(\(.*\)|EMPTY)$")
        .unwrap_or_else(|e| panic!("invalid wkt pattern: {e}"))
});

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Converts textual values into dialect-native [`Value`]s
#[derive(Clone)]
pub struct TypeConverter {
    dialect: Arc<dyn DialectFacts>,
}

impl TypeConverter {
    pub fn new(dialect: Arc<dyn DialectFacts>) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &dyn DialectFacts {
        self.dialect.as_ref()
    }

    /// Convert `value` to the native domain of `column_type`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Conversion`] naming the value and the target type
    /// when the text does not fit the type.
    pub fn convert_from_string(&self, value: &str, column_type: &str) -> Result<Value> {
        self.convert(value, column_type).map_err(|e| {
            debug!(target: "convert", value, column_type, error = %e, "conversion failed");
            e
        })
    }

    /// Convert each record with its declared type.
    ///
    /// Records flagged `IsNull` become NULL; records without a type stay text.
    pub fn convert_record_values(&self, records: &[Record]) -> Result<Vec<(String, Value)>> {
        records
            .iter()
            .map(|record| {
                let value = if record.is_null() {
                    Value::Null
                } else if let Some(ty) = record.declared_type() {
                    self.convert_from_string(&record.value, ty)?
                } else {
                    Value::Text(record.value.clone())
                };
                Ok((record.key.clone(), value))
            })
            .collect()
    }

    fn convert(&self, value: &str, column_type: &str) -> Result<Value> {
        let mut ty = column_type.trim();
        let mut nullable = false;
        loop {
            if let Some(inner) = strip_wrapper(ty, "LOWCARDINALITY") {
                ty = inner;
            } else if let Some(inner) = strip_wrapper(ty, "NULLABLE") {
                nullable = true;
                ty = inner;
            } else {
                break;
            }
        }

        if let Some(element_type) = array_element_type(ty) {
            if nullable && is_null_text(value) {
                return Ok(Value::NullOf(TypeFamily::Array));
            }
            return self.convert_array(value, element_type);
        }

        let normalized = self.dialect.normalize_type(ty);
        let base = TypeSpec::parse(&normalized).base_type;

        if let Some(custom) = self.dialect.handle_custom_data_type(value, &normalized, nullable) {
            return custom;
        }

        let family = TypeFamily::of(&base);
        if nullable && is_null_text(value) {
            return Ok(Value::NullOf(family));
        }
        convert_scalar(value, &base, family)
    }

    fn convert_array(&self, value: &str, element_type: &str) -> Result<Value> {
        let target = format!("ARRAY({})", element_type);
        let inner = strip_brackets(value.trim())
            .ok_or_else(|| EngineError::conversion(value, &target, "unbalanced array brackets"))?;
        if inner.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }

        let parts = split_elements(inner)
            .ok_or_else(|| EngineError::conversion(value, &target, "malformed array elements"))?;
        let mut items = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let part = part.trim();
            if part.is_empty() {
                return Err(EngineError::conversion(
                    value,
                    &target,
                    format!("empty element at position {} ({})", index + 1, element_type),
                ));
            }
            if part.eq_ignore_ascii_case("NULL") {
                items.push(Value::Null);
                continue;
            }
            let element = unquote(part);
            let converted = self.convert(&element, element_type).map_err(|e| {
                let reason = match e {
                    EngineError::Conversion { reason, .. } => reason,
                    other => other.to_string(),
                };
                EngineError::conversion(
                    element.as_str(),
                    element_type,
                    format!("array element {}: {}", index + 1, reason),
                )
            })?;
            items.push(converted);
        }
        Ok(Value::Array(items))
    }
}

fn is_null_text(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("NULL")
}

/// `NAME(inner)` -> `inner`, matched case-insensitively
fn strip_wrapper<'a>(ty: &'a str, name: &str) -> Option<&'a str> {
    let open = name.len();
    if ty.len() <= open + 1 || !ty.ends_with(')') {
        return None;
    }
    let bytes = ty.as_bytes();
    if !bytes[..open].eq_ignore_ascii_case(name.as_bytes()) || bytes[open] != b'(' {
        return None;
    }
    ty.get(open + 1..ty.len() - 1).map(str::trim)
}

/// Element type of `ARRAY(T)`, `_T` or `T[]`
fn array_element_type(ty: &str) -> Option<&str> {
    if let Some(inner) = strip_wrapper(ty, "ARRAY") {
        return Some(inner);
    }
    if let Some(inner) = ty.strip_suffix("[]") {
        return Some(inner.trim());
    }
    match ty.strip_prefix('_') {
        Some(inner) if !inner.is_empty() => Some(inner),
        _ => None,
    }
}

fn strip_brackets(value: &str) -> Option<&str> {
    let pairs = [('[', ']'), ('{', '}')];
    for (open, close) in pairs {
        let starts = value.starts_with(open);
        let ends = value.ends_with(close);
        match (starts, ends) {
            (true, true) if value.len() >= 2 => return Some(&value[1..value.len() - 1]),
            (true, _) | (false, true) => return None,
            _ => {}
        }
    }
    Some(value)
}

/// Split on top-level commas, respecting quotes and nested brackets
fn split_elements(inner: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '[' | '{' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' | ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if quote.is_some() || depth != 0 {
        return None;
    }
    parts.push(current);
    Some(parts)
}

fn unquote(element: &str) -> String {
    let bytes = element.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            let q = first as char;
            let body = &element[1..element.len() - 1];
            let doubled: String = [q, q].iter().collect();
            return body
                .replace(&format!("\\{}", q), &q.to_string())
                .replace(&doubled, &q.to_string());
        }
    }
    element.to_string()
}

fn convert_scalar(value: &str, base: &str, family: TypeFamily) -> Result<Value> {
    let fail = |reason: String| EngineError::conversion(value, base, reason);
    let trimmed = value.trim();

    if base == "YEAR" {
        return trimmed
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| fail(e.to_string()));
    }
    if is_time_only(base) {
        return parse_time(trimmed).map(Value::Time).ok_or_else(|| fail("invalid time format".into()));
    }

    match family {
        TypeFamily::Integer => trimmed
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| fail(e.to_string())),
        TypeFamily::Unsigned => {
            let bits = unsigned_bit_size(base);
            let parsed = trimmed.parse::<u64>().map_err(|e| fail(e.to_string()))?;
            if bits < 64 && parsed >= (1u64 << bits) {
                return Err(fail(format!("out of range for {}-bit unsigned integer", bits)));
            }
            Ok(Value::UInt(parsed))
        }
        TypeFamily::BigInteger => {
            if INTEGER_RE.is_match(trimmed) {
                Ok(Value::BigInt(trimmed.to_string()))
            } else {
                Err(fail("invalid big integer".into()))
            }
        }
        TypeFamily::Decimal => {
            if DECIMAL_RE.is_match(trimmed) {
                Ok(Value::Decimal(trimmed.to_string()))
            } else {
                Err(fail("invalid decimal".into()))
            }
        }
        TypeFamily::Float => trimmed
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| fail(e.to_string())),
        TypeFamily::Boolean => parse_bool(trimmed)
            .map(Value::Bool)
            .ok_or_else(|| fail("invalid boolean".into())),
        TypeFamily::Date => parse_date(trimmed)
            .map(Value::Date)
            .ok_or_else(|| fail("invalid date format".into())),
        TypeFamily::DateTime => {
            if is_zoned(base) {
                parse_timestamptz(trimmed)
                    .map(Value::TimestampTz)
                    .ok_or_else(|| fail("invalid datetime format".into()))
            } else if base == "INTERVAL" {
                Ok(Value::Text(value.to_string()))
            } else {
                parse_datetime(trimmed)
                    .map(Value::DateTime)
                    .ok_or_else(|| fail("invalid datetime format".into()))
            }
        }
        TypeFamily::Uuid => {
            if UUID_RE.is_match(trimmed) {
                Ok(Value::Uuid(trimmed.to_string()))
            } else {
                Err(fail("invalid UUID format".into()))
            }
        }
        TypeFamily::Json => serde_json::from_str(value)
            .map(Value::Json)
            .map_err(|e| fail(format!("invalid JSON: {}", e))),
        TypeFamily::Network => convert_network(value, base).map_err(fail),
        TypeFamily::Geometry => {
            if WKT_RE.is_match(trimmed) && balanced_parens(trimmed) {
                Ok(Value::Text(trimmed.to_string()))
            } else {
                Err(fail("invalid geometry WKT format".into()))
            }
        }
        TypeFamily::Binary => decode_binary(value).map(Value::Bytes).map_err(fail),
        _ => Ok(Value::Text(value.to_string())),
    }
}

fn is_time_only(base: &str) -> bool {
    base == "TIME" || base.starts_with("TIME WITH") || base.starts_with("TIME(")
}

fn is_zoned(base: &str) -> bool {
    base == "TIMESTAMPTZ" || base.ends_with(" WITH TIME ZONE")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Some(true),
        "0" | "f" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(value).map(|dt| dt.date()))
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_timestamptz(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .or_else(|| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z").ok())
        .or_else(|| parse_datetime(value).map(|naive| naive.and_utc().fixed_offset()))
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
        .or_else(|| parse_datetime(value).map(|dt| dt.time()))
}

fn convert_network(value: &str, base: &str) -> std::result::Result<Value, String> {
    let trimmed = value.trim();
    if base.starts_with("MACADDR") {
        return Ok(Value::Text(trimmed.to_string()));
    }
    let ip_part = trimmed.split('/').next().unwrap_or_default();
    let ip: IpAddr = ip_part
        .parse()
        .map_err(|_| format!("invalid IP address format: {}", value))?;
    match (base, ip) {
        ("IPV4", IpAddr::V6(_)) => Err(format!("expected an IPv4 address: {}", value)),
        ("IPV6", IpAddr::V4(_)) => Err(format!("expected an IPv6 address: {}", value)),
        _ => Ok(Value::Text(trimmed.to_string())),
    }
}

fn decode_binary(value: &str) -> std::result::Result<Vec<u8>, String> {
    let hex_body = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .or_else(|| value.strip_prefix("\\x"));
    match hex_body {
        Some(body) => hex::decode(body).map_err(|e| format!("invalid hex: {}", e)),
        None => Ok(value.as_bytes().to_vec()),
    }
}

fn balanced_parens(value: &str) -> bool {
    let mut depth = 0i32;
    for c in value.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database_types::DatabaseType;
    use crate::core::dialect::ConstraintQuery;
    use crate::core::query_builder::BuiltQuery;
    use std::collections::HashMap;

    struct PlainDialect {
        aliases: HashMap<&'static str, &'static str>,
    }

    impl PlainDialect {
        fn new() -> Self {
            Self {
                aliases: [("INT4", "INTEGER"), ("BOOL", "BOOLEAN")].into_iter().collect(),
            }
        }
    }

    impl DialectFacts for PlainDialect {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Postgres
        }
        fn max_parameters(&self) -> usize {
            999
        }
        fn supported_column_types(&self) -> &[&'static str] {
            &["INTEGER", "TEXT"]
        }
        fn alias_map(&self) -> &HashMap<&'static str, &'static str> {
            &self.aliases
        }
        fn table_info_query(&self, _schema: &str) -> BuiltQuery {
            BuiltQuery::default()
        }
        fn schema_columns_query(&self, _schema: &str) -> BuiltQuery {
            BuiltQuery::default()
        }
        fn column_types_query(&self, _schema: &str, _table: &str) -> BuiltQuery {
            BuiltQuery::default()
        }
        fn primary_key_query(&self, _schema: &str, _table: &str) -> BuiltQuery {
            BuiltQuery::default()
        }
        fn foreign_key_query(&self, _schema: &str, _table: &str) -> BuiltQuery {
            BuiltQuery::default()
        }
        fn graph_query(&self, _schema: &str) -> BuiltQuery {
            BuiltQuery::default()
        }
        fn constraint_queries(&self, _schema: &str, _table: &str) -> Vec<ConstraintQuery> {
            Vec::new()
        }
        fn handle_custom_data_type(
            &self,
            value: &str,
            base_type: &str,
            _nullable: bool,
        ) -> Option<Result<Value>> {
            (base_type == "HSTORE").then(|| Ok(Value::Text(format!("hstore:{}", value))))
        }
    }

    fn converter() -> TypeConverter {
        TypeConverter::new(Arc::new(PlainDialect::new()))
    }

    #[test]
    fn test_integer_and_alias() {
        let c = converter();
        assert_eq!(c.convert_from_string("42", "int4").unwrap(), Value::Int(42));
        assert!(matches!(
            c.convert_from_string("4x", "INTEGER"),
            Err(EngineError::Conversion { .. })
        ));
    }

    #[test]
    fn test_nullable_empty_is_absent() {
        let c = converter();
        assert_eq!(
            c.convert_from_string("", "Nullable(Int32)").unwrap(),
            Value::NullOf(TypeFamily::Integer)
        );
        assert_eq!(
            c.convert_from_string("null", "NULLABLE(text)").unwrap(),
            Value::NullOf(TypeFamily::Text)
        );
        assert_eq!(
            c.convert_from_string("7", "nullable(INT32)").unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_low_cardinality_unwrapped() {
        let c = converter();
        assert_eq!(
            c.convert_from_string("x", "LowCardinality(Nullable(String))").unwrap(),
            Value::Text("x".into())
        );
        assert_eq!(
            c.convert_from_string("", "LowCardinality(Nullable(String))").unwrap(),
            Value::NullOf(TypeFamily::Text)
        );
    }

    #[test]
    fn test_non_ascii_wrapper_names_are_plain_types() {
        let c = converter();
        for ty in ["ARRAé(INTEGER)", "NULLABLé(INTEGER)", "LOWCARDINALITé(String)", "é(x)"] {
            assert_eq!(c.convert_from_string("1", ty).unwrap(), Value::Text("1".into()), "{ty}");
        }
        assert_eq!(
            c.convert_from_string("5", "nullable(INTEGER)").unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn test_unsigned_range() {
        let c = converter();
        assert_eq!(c.convert_from_string("255", "UINT8").unwrap(), Value::UInt(255));
        assert!(c.convert_from_string("256", "UINT8").is_err());
        assert!(c.convert_from_string("-1", "UINT64").is_err());
    }

    #[test]
    fn test_decimal_keeps_digits() {
        let c = converter();
        assert_eq!(
            c.convert_from_string("12345678901234567890.123456789", "NUMERIC(30,9)").unwrap(),
            Value::Decimal("12345678901234567890.123456789".into())
        );
        assert!(c.convert_from_string("1.2.3", "DECIMAL").is_err());
        assert_eq!(
            c.convert_from_string("170141183460469231731687303715884105727", "INT128").unwrap(),
            Value::BigInt("170141183460469231731687303715884105727".into())
        );
    }

    #[test]
    fn test_booleans() {
        let c = converter();
        for (input, expected) in [("TRUE", true), ("f", false), ("1", true), ("no", false)] {
            assert_eq!(c.convert_from_string(input, "bool").unwrap(), Value::Bool(expected));
        }
        assert!(c.convert_from_string("maybe", "BOOLEAN").is_err());
    }

    #[test]
    fn test_temporal() {
        let c = converter();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(c.convert_from_string("2024-03-01", "DATE").unwrap(), Value::Date(date));
        assert_eq!(
            c.convert_from_string("2024-03-01 10:20:30", "DATE").unwrap(),
            Value::Date(date)
        );
        assert_eq!(
            c.convert_from_string("2024-03-01T10:20:30", "TIMESTAMP").unwrap(),
            Value::DateTime(date.and_hms_opt(10, 20, 30).unwrap())
        );
        assert_eq!(
            c.convert_from_string("2024-03-01", "DATETIME").unwrap(),
            Value::DateTime(date.and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(
            c.convert_from_string("10:20:30", "TIME").unwrap(),
            Value::Time(NaiveTime::from_hms_opt(10, 20, 30).unwrap())
        );
        assert!(matches!(
            c.convert_from_string("2024-03-01T10:20:30+02:00", "TIMESTAMPTZ").unwrap(),
            Value::TimestampTz(_)
        ));
        assert_eq!(c.convert_from_string("2024", "YEAR").unwrap(), Value::Int(2024));
        assert!(c.convert_from_string("yesterday", "DATE").is_err());
    }

    #[test]
    fn test_uuid_json_network_geometry() {
        let c = converter();
        assert!(c
            .convert_from_string("550e8400-e29b-41d4-a716-446655440000", "UUID")
            .is_ok());
        assert!(c.convert_from_string("not-a-uuid", "UUID").is_err());
        assert!(matches!(
            c.convert_from_string(r#"{"a":1}"#, "JSONB").unwrap(),
            Value::Json(_)
        ));
        assert!(c.convert_from_string("{", "JSON").is_err());
        assert!(c.convert_from_string("10.0.0.0/8", "CIDR").is_ok());
        assert!(c.convert_from_string("::1", "IPV4").is_err());
        assert!(c.convert_from_string("999.1.1.1", "INET").is_err());
        assert!(c.convert_from_string("08:00:2b:01:02:03", "MACADDR").is_ok());
        assert!(c.convert_from_string("POINT(1 2)", "GEOMETRY").is_ok());
        assert!(c.convert_from_string("POLYGON EMPTY", "POLYGON").is_ok());
        assert!(c.convert_from_string("POINT(1 2", "POINT").is_err());
    }

    #[test]
    fn test_binary_hex() {
        let c = converter();
        assert_eq!(
            c.convert_from_string("0xdead", "BYTEA").unwrap(),
            Value::Bytes(vec![0xde, 0xad])
        );
        assert_eq!(
            c.convert_from_string("\\x0102", "BYTEA").unwrap(),
            Value::Bytes(vec![1, 2])
        );
        assert_eq!(
            c.convert_from_string("ab", "BLOB").unwrap(),
            Value::Bytes(b"ab".to_vec())
        );
        assert!(c.convert_from_string("0xzz", "BYTEA").is_err());
    }

    #[test]
    fn test_arrays_case_insensitive() {
        let c = converter();
        let expected = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(c.convert_from_string("[1,2,3]", "ARRAY(INTEGER)").unwrap(), expected);
        assert_eq!(c.convert_from_string("[1, 2, 3]", "Array(integer)").unwrap(), expected);
        assert_eq!(c.convert_from_string("{1,2,3}", "_int4").unwrap(), expected);
        assert_eq!(c.convert_from_string("1,2,3", "INTEGER[]").unwrap(), expected);
    }

    #[test]
    fn test_array_edge_cases() {
        let c = converter();
        assert_eq!(
            c.convert_from_string("[]", "Array(String)").unwrap(),
            Value::Array(vec![])
        );
        assert_eq!(
            c.convert_from_string("['a,b', \"c\"]", "Array(String)").unwrap(),
            Value::Array(vec![Value::Text("a,b".into()), Value::Text("c".into())])
        );
        assert_eq!(
            c.convert_from_string("[[1],[2,3]]", "Array(Array(Int64))").unwrap(),
            Value::Array(vec![
                Value::Array(vec![Value::Int(1)]),
                Value::Array(vec![Value::Int(2), Value::Int(3)]),
            ])
        );

        let err = c.convert_from_string("[1,,3]", "Array(Int64)").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("position 2"), "{msg}");
        assert!(msg.contains("Int64"), "{msg}");

        let err = c.convert_from_string("[1,x,3]", "Array(Int64)").unwrap_err();
        assert!(err.to_string().contains("'x'"));

        assert!(c.convert_from_string("[1,2", "Array(Int64)").is_err());
        assert!(c.convert_from_string("1,2]", "Array(Int64)").is_err());
    }

    #[test]
    fn test_custom_hook_takes_precedence() {
        let c = converter();
        assert_eq!(
            c.convert_from_string("a=>1", "hstore").unwrap(),
            Value::Text("hstore:a=>1".into())
        );
    }

    #[test]
    fn test_convert_record_values() {
        let c = converter();
        let records = vec![
            Record::new("id", "5").with_extra("Type", "INTEGER"),
            Record::new("name", "bob"),
            Record::new("gone", "").with_extra("IsNull", "true"),
        ];
        let converted = c.convert_record_values(&records).unwrap();
        assert_eq!(converted[0], ("id".into(), Value::Int(5)));
        assert_eq!(converted[1], ("name".into(), Value::Text("bob".into())));
        assert_eq!(converted[2], ("gone".into(), Value::Null));
    }
}
