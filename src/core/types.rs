//! Canonical column types
//!
//! Types travel through the engine as canonical uppercase strings such as
//! `CHARACTER VARYING(255)` or `NUMERIC(10,2)`. This module parses those strings,
//! collapses dialect aliases and sorts base types into the coarse families the
//! converter and the introspector dispatch on.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

static TYPE_SPEC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_ ]*?)\s*(?:\((\d+)(?:\s*,\s*(\d+))?\))?$")
        .unwrap_or_else(|e| panic!("invalid type spec pattern: {e}"))
});

/// A parsed type such as `VARCHAR(255)` or `DECIMAL(10,2)`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeSpec {
    /// Uppercase type name without parameters
    pub base_type: String,
    /// Length for `VARCHAR(255)`-style types
    pub length: Option<u32>,
    /// Precision for `DECIMAL(10,2)`-style types
    pub precision: Option<u32>,
    /// Scale for `DECIMAL(10,2)`-style types
    pub scale: Option<u32>,
}

impl TypeSpec {
    /// Parse a full type string.
    ///
    /// A single parameter is read as a length, two parameters as precision and
    /// scale. Strings the grammar does not cover become an uppercase base type.
    pub fn parse(full_type: &str) -> Self {
        let trimmed = full_type.trim();
        let Some(caps) = TYPE_SPEC_RE.captures(trimmed) else {
            return TypeSpec {
                base_type: trimmed.to_uppercase(),
                ..Default::default()
            };
        };

        let base_type = caps
            .get(1)
            .map(|m| m.as_str().trim().to_uppercase())
            .unwrap_or_default();
        let first = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let second = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());

        match (first, second) {
            (Some(p), Some(s)) => TypeSpec {
                base_type,
                length: None,
                precision: Some(p),
                scale: Some(s),
            },
            (Some(l), None) => TypeSpec {
                base_type,
                length: Some(l),
                precision: None,
                scale: None,
            },
            _ => TypeSpec {
                base_type,
                ..Default::default()
            },
        }
    }

    /// Family of the base type
    pub fn family(&self) -> TypeFamily {
        TypeFamily::of(&self.base_type)
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.precision, self.scale, self.length) {
            (Some(p), scale, _) => write!(f, "{}({},{})", self.base_type, p, scale.unwrap_or(0)),
            (None, _, Some(l)) => write!(f, "{}({})", self.base_type, l),
            _ => f.write_str(&self.base_type),
        }
    }
}

/// Normalize a type name through an alias map of uppercase alias to canonical name,
/// keeping any length/precision parameters.
pub fn normalize_with_alias_map(type_name: &str, aliases: &HashMap<&'static str, &'static str>) -> String {
    let mut spec = TypeSpec::parse(type_name);
    if let Some(canonical) = aliases.get(spec.base_type.as_str()) {
        spec.base_type = (*canonical).to_string();
    }
    spec.to_string()
}

/// Coarse value family of a canonical base type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeFamily {
    Integer,
    Unsigned,
    BigInteger,
    Decimal,
    Float,
    Boolean,
    Date,
    DateTime,
    Uuid,
    Text,
    Json,
    Binary,
    Array,
    Geometry,
    Network,
    Xml,
    Other,
}

const INT_TYPES: &[&str] = &[
    "INTEGER", "SMALLINT", "BIGINT", "INT", "TINYINT", "MEDIUMINT", "INT2", "INT4", "INT8",
    "INT16", "INT32", "INT64", "SERIAL", "BIGSERIAL", "SMALLSERIAL",
];

const UINT_TYPES: &[&str] = &[
    "TINYINT UNSIGNED",
    "SMALLINT UNSIGNED",
    "MEDIUMINT UNSIGNED",
    "INT UNSIGNED",
    "INTEGER UNSIGNED",
    "BIGINT UNSIGNED",
    "UINT8",
    "UINT16",
    "UINT32",
    "UINT64",
];

const BIG_INT_TYPES: &[&str] = &["INT128", "INT256", "UINT128", "UINT256"];

const DECIMAL_TYPES: &[&str] = &[
    "DECIMAL",
    "NUMERIC",
    "NUMBER",
    "MONEY",
    "DECIMAL32",
    "DECIMAL64",
    "DECIMAL128",
    "DECIMAL256",
];

const FLOAT_TYPES: &[&str] = &[
    "REAL",
    "DOUBLE PRECISION",
    "FLOAT",
    "DOUBLE",
    "FLOAT4",
    "FLOAT8",
    "FLOAT32",
    "FLOAT64",
];

const BOOL_TYPES: &[&str] = &["BOOLEAN", "BOOL", "BIT"];

const DATE_TYPES: &[&str] = &["DATE", "DATE32"];

const DATETIME_TYPES: &[&str] = &[
    "TIMESTAMP",
    "TIMESTAMP WITH TIME ZONE",
    "TIMESTAMP WITHOUT TIME ZONE",
    "TIMESTAMPTZ",
    "TIME",
    "TIME WITH TIME ZONE",
    "TIME WITHOUT TIME ZONE",
    "DATETIME",
    "YEAR",
    "DATETIME2",
    "SMALLDATETIME",
    "INTERVAL",
    "DATETIME64",
];

const UUID_TYPES: &[&str] = &["UUID"];

const TEXT_TYPES: &[&str] = &[
    "CHARACTER VARYING",
    "CHARACTER",
    "TEXT",
    "VARCHAR",
    "CHAR",
    "NVARCHAR",
    "NCHAR",
    "BPCHAR",
    "TINYTEXT",
    "MEDIUMTEXT",
    "LONGTEXT",
    "STRING",
    "FIXEDSTRING",
    "CLOB",
    "CITEXT",
    "NAME",
];

const JSON_TYPES: &[&str] = &["JSON", "JSONB"];

const BINARY_TYPES: &[&str] = &[
    "BYTEA",
    "BINARY",
    "VARBINARY",
    "TINYBLOB",
    "BLOB",
    "MEDIUMBLOB",
    "LONGBLOB",
    "IMAGE",
];

const GEOMETRY_TYPES: &[&str] = &[
    "POINT",
    "LINE",
    "LSEG",
    "BOX",
    "PATH",
    "POLYGON",
    "CIRCLE",
    "GEOMETRY",
    "GEOGRAPHY",
    "LINESTRING",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

const NETWORK_TYPES: &[&str] = &["CIDR", "INET", "MACADDR", "MACADDR8", "IPV4", "IPV6"];

const XML_TYPES: &[&str] = &["XML"];

/// Types where a user-specified length is meaningful
const LENGTH_TYPES: &[&str] = &[
    "VARCHAR",
    "CHAR",
    "CHARACTER",
    "CHARACTER VARYING",
    "NVARCHAR",
    "NCHAR",
    "VARBINARY",
    "BINARY",
    "BIT",
    "BIT VARYING",
    "FIXEDSTRING",
];

/// Types where a user-specified precision/scale is meaningful
const PRECISION_TYPES: &[&str] = &[
    "DECIMAL",
    "NUMERIC",
    "NUMBER",
    "FLOAT",
    "DOUBLE",
    "REAL",
    "MONEY",
    "TIME",
    "TIMESTAMP",
    "DATETIME2",
    "DATETIME64",
];

impl TypeFamily {
    /// Classify a canonical base type (no parameters, any case)
    pub fn of(base_type: &str) -> Self {
        let base = base_type.trim().to_uppercase();
        let base = base.as_str();
        if base.starts_with("ARRAY") || base.starts_with('_') || base.ends_with("[]") {
            return TypeFamily::Array;
        }
        if BIG_INT_TYPES.contains(&base) {
            TypeFamily::BigInteger
        } else if UINT_TYPES.contains(&base) {
            TypeFamily::Unsigned
        } else if INT_TYPES.contains(&base) {
            TypeFamily::Integer
        } else if DECIMAL_TYPES.contains(&base) {
            TypeFamily::Decimal
        } else if FLOAT_TYPES.contains(&base) {
            TypeFamily::Float
        } else if BOOL_TYPES.contains(&base) {
            TypeFamily::Boolean
        } else if DATE_TYPES.contains(&base) {
            TypeFamily::Date
        } else if DATETIME_TYPES.contains(&base) {
            TypeFamily::DateTime
        } else if UUID_TYPES.contains(&base) {
            TypeFamily::Uuid
        } else if JSON_TYPES.contains(&base) {
            TypeFamily::Json
        } else if BINARY_TYPES.contains(&base) {
            TypeFamily::Binary
        } else if GEOMETRY_TYPES.contains(&base) {
            TypeFamily::Geometry
        } else if NETWORK_TYPES.contains(&base) {
            TypeFamily::Network
        } else if XML_TYPES.contains(&base) {
            TypeFamily::Xml
        } else if TEXT_TYPES.contains(&base) {
            TypeFamily::Text
        } else {
            TypeFamily::Other
        }
    }

    /// Stable lowercase name, used in conversion errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeFamily::Integer => "integer",
            TypeFamily::Unsigned => "unsigned",
            TypeFamily::BigInteger => "big integer",
            TypeFamily::Decimal => "decimal",
            TypeFamily::Float => "float",
            TypeFamily::Boolean => "boolean",
            TypeFamily::Date => "date",
            TypeFamily::DateTime => "datetime",
            TypeFamily::Uuid => "uuid",
            TypeFamily::Text => "text",
            TypeFamily::Json => "json",
            TypeFamily::Binary => "binary",
            TypeFamily::Array => "array",
            TypeFamily::Geometry => "geometry",
            TypeFamily::Network => "network",
            TypeFamily::Xml => "xml",
            TypeFamily::Other => "other",
        }
    }
}

/// Bit width of an unsigned canonical type (`UINT32` -> 32, `SMALLINT UNSIGNED` -> 16)
pub fn unsigned_bit_size(base_type: &str) -> u32 {
    let base = base_type.to_uppercase();
    if let Some(bits) = base.strip_prefix("UINT").and_then(|b| b.parse::<u32>().ok()) {
        return bits;
    }
    match base.split_whitespace().next().unwrap_or_default() {
        "TINYINT" => 8,
        "SMALLINT" => 16,
        "MEDIUMINT" => 24,
        "INT" | "INTEGER" => 32,
        _ => 64,
    }
}

/// Whether `base_type` accepts a user-specified length
pub fn allows_length(base_type: &str) -> bool {
    LENGTH_TYPES.contains(&base_type.to_uppercase().as_str())
}

/// Whether `base_type` accepts a user-specified precision/scale
pub fn allows_precision(base_type: &str) -> bool {
    PRECISION_TYPES.contains(&base_type.to_uppercase().as_str())
}

/// Build a display type string from introspected facts.
///
/// Length and precision are attached only for types in the allow-lists, so
/// opaque types never leak internal storage sizes.
pub fn format_column_type(
    base_type: &str,
    length: Option<u32>,
    precision: Option<u32>,
    scale: Option<u32>,
) -> String {
    let base = base_type.trim().to_uppercase();
    if allows_length(&base) {
        if let Some(l) = length.filter(|l| *l > 0) {
            return format!("{base}({l})");
        }
    }
    if allows_precision(&base) {
        if let Some(p) = precision.filter(|p| *p > 0) {
            return match scale {
                Some(s) => format!("{base}({p},{s})"),
                None => format!("{base}({p})"),
            };
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_spec() {
        let spec = TypeSpec::parse("varchar(255)");
        assert_eq!(spec.base_type, "VARCHAR");
        assert_eq!(spec.length, Some(255));
        assert_eq!(spec.precision, None);

        let spec = TypeSpec::parse("DECIMAL(10, 2)");
        assert_eq!(spec.base_type, "DECIMAL");
        assert_eq!(spec.precision, Some(10));
        assert_eq!(spec.scale, Some(2));
        assert_eq!(spec.length, None);

        let spec = TypeSpec::parse("double precision");
        assert_eq!(spec.base_type, "DOUBLE PRECISION");
        assert_eq!(spec.to_string(), "DOUBLE PRECISION");

        let spec = TypeSpec::parse("timestamp(6) with time zone");
        assert_eq!(spec.base_type, "TIMESTAMP(6) WITH TIME ZONE");
    }

    #[test]
    fn test_type_spec_display() {
        assert_eq!(TypeSpec::parse("numeric(10,2)").to_string(), "NUMERIC(10,2)");
        assert_eq!(TypeSpec::parse("char(3)").to_string(), "CHAR(3)");
        assert_eq!(TypeSpec::parse("text").to_string(), "TEXT");
    }

    #[test]
    fn test_normalize_with_alias_map() {
        let aliases: HashMap<&'static str, &'static str> =
            [("INT4", "INTEGER"), ("VARCHAR", "CHARACTER VARYING")]
                .into_iter()
                .collect();
        assert_eq!(normalize_with_alias_map("int4", &aliases), "INTEGER");
        assert_eq!(
            normalize_with_alias_map("varchar(20)", &aliases),
            "CHARACTER VARYING(20)"
        );
        assert_eq!(normalize_with_alias_map("text", &aliases), "TEXT");
    }

    #[test]
    fn test_type_family() {
        assert_eq!(TypeFamily::of("integer"), TypeFamily::Integer);
        assert_eq!(TypeFamily::of("UINT32"), TypeFamily::Unsigned);
        assert_eq!(TypeFamily::of("INT128"), TypeFamily::BigInteger);
        assert_eq!(TypeFamily::of("NUMERIC"), TypeFamily::Decimal);
        assert_eq!(TypeFamily::of("Decimal64"), TypeFamily::Decimal);
        assert_eq!(TypeFamily::of("DOUBLE PRECISION"), TypeFamily::Float);
        assert_eq!(TypeFamily::of("TIMESTAMP WITH TIME ZONE"), TypeFamily::DateTime);
        assert_eq!(TypeFamily::of("BYTEA"), TypeFamily::Binary);
        assert_eq!(TypeFamily::of("_int4"), TypeFamily::Array);
        assert_eq!(TypeFamily::of("POLYGON"), TypeFamily::Geometry);
        assert_eq!(TypeFamily::of("INET"), TypeFamily::Network);
        assert_eq!(TypeFamily::of("HSTORE"), TypeFamily::Other);
    }

    #[test]
    fn test_unsigned_bit_size() {
        assert_eq!(unsigned_bit_size("UINT8"), 8);
        assert_eq!(unsigned_bit_size("SMALLINT UNSIGNED"), 16);
        assert_eq!(unsigned_bit_size("INT UNSIGNED"), 32);
        assert_eq!(unsigned_bit_size("BIGINT UNSIGNED"), 64);
    }

    #[test]
    fn test_format_column_type_allow_lists() {
        assert_eq!(format_column_type("varchar", Some(255), None, None), "VARCHAR(255)");
        assert_eq!(format_column_type("NUMERIC", None, Some(10), Some(2)), "NUMERIC(10,2)");
        // geometry carries an internal size that must not leak
        assert_eq!(format_column_type("POINT", Some(16), None, None), "POINT");
        assert_eq!(format_column_type("INTEGER", None, Some(32), Some(0)), "INTEGER");
        assert_eq!(format_column_type("TEXT", Some(0), None, None), "TEXT");
    }
}
