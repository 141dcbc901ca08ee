//! Type bridge between source dialects, the warehouse DDL and Arrow.
//!
//! Unrecognised type names always degrade to a string type: schema drift in a
//! source must never block a bulk import. The columnar mapping of a source
//! type is defined as the columnar mapping of its warehouse type, so decode
//! and re-encode go through the exact same function.

use arrow::datatypes::{DataType, TimeUnit};

use crate::dialect::Dialect;

/// Precision and scale used when a decimal declares none.
pub const DEFAULT_DECIMAL: (u8, i8) = (38, 10);

const MAX_DECIMAL_PRECISION: u8 = 38;

/// Which naming system a type name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSystem {
    Source(Dialect),
    Warehouse,
}

/// A type name split into its lowercase base, its `(..)` arguments and
/// whether it was declared unsigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    pub base: String,
    pub args: Vec<String>,
    pub unsigned: bool,
}

impl TypeName {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        let unsigned = lower.contains("unsigned");
        let without_flags = lower
            .replace("unsigned", "")
            .replace("zerofill", "")
            .trim()
            .to_string();

        let (base, args) = match (without_flags.find('('), without_flags.rfind(')')) {
            (Some(open), Some(close)) if close > open => {
                let args = without_flags[open + 1..close]
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
                let mut base = without_flags[..open].trim().to_string();
                // e.g. "timestamp(3) with time zone"
                let tail = without_flags[close + 1..].trim();
                if !tail.is_empty() {
                    base = format!("{} {}", base, tail);
                }
                (base, args)
            }
            _ => (without_flags, Vec::new()),
        };

        Self {
            base,
            args,
            unsigned,
        }
    }

    fn first_arg(&self) -> Option<u32> {
        self.args.first().and_then(|a| a.parse().ok())
    }
}

/// Parse decimal precision/scale out of a `(p,s)` suffix, defaulting to
/// (38, 10) when absent. Precision is capped to what Decimal128 can hold.
pub fn decimal_precision_scale(args: &[String]) -> (u8, i8) {
    let precision = args.first().and_then(|p| p.parse::<u32>().ok());
    let scale = args.get(1).and_then(|s| s.parse::<i32>().ok());
    match precision {
        Some(p) => {
            let p = p.clamp(1, MAX_DECIMAL_PRECISION as u32) as u8;
            let s = scale.unwrap_or(0).clamp(0, p as i32) as i8;
            (p, s)
        }
        None => DEFAULT_DECIMAL,
    }
}

fn decimal_ddl(args: &[String]) -> String {
    let (p, s) = decimal_precision_scale(args);
    format!("DECIMAL({},{})", p, s)
}

/// Map a source column type to the warehouse DDL type name.
pub fn to_warehouse_type(dialect: Dialect, source_type: &str) -> String {
    let name = TypeName::parse(source_type);
    let mapped = match dialect {
        Dialect::MySql | Dialect::MariaDb => mysql_to_warehouse(&name),
        Dialect::Postgres => postgres_to_warehouse(&name),
        Dialect::SqlServer => sqlserver_to_warehouse(&name),
    };
    mapped.unwrap_or_else(|| "STRING".to_string())
}

fn mysql_to_warehouse(name: &TypeName) -> Option<String> {
    let ty = match name.base.as_str() {
        "tinyint" if name.first_arg() == Some(1) && !name.unsigned => "BOOLEAN",
        "tinyint" if name.unsigned => "SMALLINT",
        "tinyint" => "TINYINT",
        "smallint" if name.unsigned => "INT",
        "smallint" | "year" => "SMALLINT",
        "mediumint" => "INT",
        "int" | "integer" if name.unsigned => "BIGINT",
        "int" | "integer" => "INT",
        "bigint" if name.unsigned => "LARGEINT",
        "bigint" => "BIGINT",
        "float" => "FLOAT",
        "double" | "real" | "double precision" => "DOUBLE",
        "decimal" | "numeric" | "dec" | "fixed" => return Some(decimal_ddl(&name.args)),
        "bit" if name.first_arg().unwrap_or(1) == 1 => "BOOLEAN",
        "bit" => "BIGINT",
        "bool" | "boolean" => "BOOLEAN",
        "date" => "DATE",
        "datetime" | "timestamp" => "DATETIME(6)",
        _ => return None,
    };
    Some(ty.to_string())
}

fn postgres_to_warehouse(name: &TypeName) -> Option<String> {
    let ty = match name.base.as_str() {
        "smallint" | "int2" | "smallserial" => "SMALLINT",
        "integer" | "int" | "int4" | "serial" => "INT",
        "bigint" | "int8" | "bigserial" => "BIGINT",
        "real" | "float4" => "FLOAT",
        "double precision" | "float8" => "DOUBLE",
        "numeric" | "decimal" => return Some(decimal_ddl(&name.args)),
        "money" => "DECIMAL(19,2)",
        "boolean" | "bool" => "BOOLEAN",
        "date" => "DATE",
        "timestamp"
        | "timestamptz"
        | "timestamp without time zone"
        | "timestamp with time zone" => "DATETIME(6)",
        _ => return None,
    };
    Some(ty.to_string())
}

fn sqlserver_to_warehouse(name: &TypeName) -> Option<String> {
    let ty = match name.base.as_str() {
        "bit" => "BOOLEAN",
        // SQL Server tinyint is unsigned 0..=255
        "tinyint" | "smallint" => "SMALLINT",
        "int" => "INT",
        "bigint" => "BIGINT",
        "real" => "FLOAT",
        "float" => "DOUBLE",
        "decimal" | "numeric" => return Some(decimal_ddl(&name.args)),
        "money" => "DECIMAL(19,4)",
        "smallmoney" => "DECIMAL(10,4)",
        "date" => "DATE",
        "datetime" | "datetime2" | "smalldatetime" => "DATETIME(6)",
        _ => return None,
    };
    Some(ty.to_string())
}

/// Map a type name from either naming system to the Arrow type used while
/// streaming.
pub fn to_columnar_type(system: TypeSystem, type_name: &str) -> DataType {
    match system {
        TypeSystem::Source(dialect) => warehouse_to_columnar(&to_warehouse_type(dialect, type_name)),
        TypeSystem::Warehouse => warehouse_to_columnar(type_name),
    }
}

fn warehouse_to_columnar(type_name: &str) -> DataType {
    let name = TypeName::parse(type_name);
    match name.base.as_str() {
        "tinyint" => DataType::Int8,
        "smallint" => DataType::Int16,
        "int" | "integer" => DataType::Int32,
        "bigint" => DataType::Int64,
        "largeint" => DataType::Decimal128(MAX_DECIMAL_PRECISION, 0),
        "float" => DataType::Float32,
        "double" => DataType::Float64,
        "decimal" | "decimalv2" | "decimalv3" => {
            let (p, s) = decimal_precision_scale(&name.args);
            DataType::Decimal128(p, s)
        }
        "boolean" | "bool" => DataType::Boolean,
        "date" | "datev2" => DataType::Date32,
        "datetime" | "datetimev2" => DataType::Timestamp(TimeUnit::Microsecond, None),
        "varbinary" => DataType::Binary,
        _ => DataType::Utf8,
    }
}

/// Inverse of [`to_columnar_type`] for the warehouse naming system; used to
/// derive DDL from an incoming Arrow schema.
pub fn columnar_to_warehouse_type(data_type: &DataType) -> String {
    match data_type {
        DataType::Int8 => "TINYINT".to_string(),
        DataType::Int16 | DataType::UInt8 => "SMALLINT".to_string(),
        DataType::Int32 | DataType::UInt16 => "INT".to_string(),
        DataType::Int64 | DataType::UInt32 => "BIGINT".to_string(),
        DataType::UInt64 => "LARGEINT".to_string(),
        DataType::Float16 | DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Decimal128(p, s) => format!("DECIMAL({},{})", p, s),
        DataType::Date32 | DataType::Date64 => "DATE".to_string(),
        DataType::Timestamp(_, _) => "DATETIME(6)".to_string(),
        DataType::Binary | DataType::LargeBinary => "VARBINARY".to_string(),
        _ => "STRING".to_string(),
    }
}
