//! Database type tags, runtime values and the fixed language-type table.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::error::{MapperError, MapperResult};

/// Database type tag of a column or parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DbType {
    Uuid,
    Varchar,
    TimestampTz,
    Timestamp,
    Boolean,
    BigInt,
    Integer,
    SmallInt,
    Double,
    Real,
    Numeric,
    Bytea,
}

impl DbType {
    /// `PostgreSQL` spelling of the type.
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Uuid => "UUID",
            Self::Varchar => "VARCHAR",
            Self::TimestampTz => "TIMESTAMPTZ",
            Self::Timestamp => "TIMESTAMP",
            Self::Boolean => "BOOLEAN",
            Self::BigInt => "BIGINT",
            Self::Integer => "INTEGER",
            Self::SmallInt => "SMALLINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Real => "REAL",
            Self::Numeric => "NUMERIC",
            Self::Bytea => "BYTEA",
        }
    }

    /// Whether values of this type can be compared with `<`/`>`.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        !matches!(self, Self::Boolean | Self::Bytea)
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A value bound to a parameter or read from a column. `None` is SQL `NULL`.
#[derive(Clone, Debug, PartialEq)]
pub enum DbValue {
    Uuid(Option<Uuid>),
    Text(Option<String>),
    TimestampTz(Option<DateTime<Utc>>),
    Timestamp(Option<NaiveDateTime>),
    Bool(Option<bool>),
    BigInt(Option<i64>),
    Integer(Option<i32>),
    SmallInt(Option<i16>),
    Double(Option<f64>),
    Real(Option<f32>),
    Numeric(Option<Decimal>),
    Bytes(Option<Vec<u8>>),
}

macro_rules! downcast_value {
    ($any:expr, $($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            if let Some(v) = $any.downcast_ref::<$ty>() {
                return Ok(Self::$variant(Some(Clone::clone(v))));
            }
            if let Some(v) = $any.downcast_ref::<Option<$ty>>() {
                return Ok(Self::$variant(Clone::clone(v)));
            }
        )+
    };
}

impl DbValue {
    #[must_use]
    pub const fn db_type(&self) -> DbType {
        match self {
            Self::Uuid(_) => DbType::Uuid,
            Self::Text(_) => DbType::Varchar,
            Self::TimestampTz(_) => DbType::TimestampTz,
            Self::Timestamp(_) => DbType::Timestamp,
            Self::Bool(_) => DbType::Boolean,
            Self::BigInt(_) => DbType::BigInt,
            Self::Integer(_) => DbType::Integer,
            Self::SmallInt(_) => DbType::SmallInt,
            Self::Double(_) => DbType::Double,
            Self::Real(_) => DbType::Real,
            Self::Numeric(_) => DbType::Numeric,
            Self::Bytes(_) => DbType::Bytea,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Uuid(None)
                | Self::Text(None)
                | Self::TimestampTz(None)
                | Self::Timestamp(None)
                | Self::Bool(None)
                | Self::BigInt(None)
                | Self::Integer(None)
                | Self::SmallInt(None)
                | Self::Double(None)
                | Self::Real(None)
                | Self::Numeric(None)
                | Self::Bytes(None)
        )
    }

    /// Typed `NULL` for the given column type.
    #[must_use]
    pub const fn null(db_type: DbType) -> Self {
        match db_type {
            DbType::Uuid => Self::Uuid(None),
            DbType::Varchar => Self::Text(None),
            DbType::TimestampTz => Self::TimestampTz(None),
            DbType::Timestamp => Self::Timestamp(None),
            DbType::Boolean => Self::Bool(None),
            DbType::BigInt => Self::BigInt(None),
            DbType::Integer => Self::Integer(None),
            DbType::SmallInt => Self::SmallInt(None),
            DbType::Double => Self::Double(None),
            DbType::Real => Self::Real(None),
            DbType::Numeric => Self::Numeric(None),
            DbType::Bytea => Self::Bytes(None),
        }
    }

    /// Converts a value whose type is only known at runtime, using the fixed type table.
    ///
    /// # Errors
    /// Returns [`MapperError::UnsupportedType`] (parameter `type`) when `V` has no mapping.
    pub fn from_any<V: Any>(value: &V) -> MapperResult<Self> {
        let any: &dyn Any = value;
        if let Some(v) = any.downcast_ref::<&'static str>() {
            return Ok(Self::Text(Some((*v).to_owned())));
        }
        if let Some(v) = any.downcast_ref::<Option<&'static str>>() {
            return Ok(Self::Text(v.map(str::to_owned)));
        }
        downcast_value!(any,
            Uuid => Uuid,
            String => Text,
            DateTime<Utc> => TimestampTz,
            NaiveDateTime => Timestamp,
            bool => Bool,
            i64 => BigInt,
            i32 => Integer,
            i16 => SmallInt,
            f64 => Double,
            f32 => Real,
            Decimal => Numeric,
            Vec<u8> => Bytes
        );
        Err(MapperError::unsupported_type(type_name::<V>()))
    }

    /// Extracts a typed value, see [`FromDbValue`].
    ///
    /// # Errors
    /// Returns an error if the value has another type or is an unexpected `NULL`.
    pub fn extract<T: FromDbValue>(self) -> MapperResult<T> {
        T::from_db_value(self)
    }
}

/// Reads a typed Rust value out of a [`DbValue`].
pub trait FromDbValue: Sized {
    /// # Errors
    /// Returns an error on type mismatch or when a non-optional target receives `NULL`.
    fn from_db_value(value: DbValue) -> MapperResult<Self>;
}

macro_rules! db_value_conversions {
    ($($ty:ty => $variant:ident : $tag:ident),+ $(,)?) => {
        $(
            impl From<$ty> for DbValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(Some(v))
                }
            }

            impl From<Option<$ty>> for DbValue {
                fn from(v: Option<$ty>) -> Self {
                    Self::$variant(v)
                }
            }

            impl FromDbValue for Option<$ty> {
                fn from_db_value(value: DbValue) -> MapperResult<Self> {
                    match value {
                        DbValue::$variant(v) => Ok(v),
                        other => Err(MapperError::ValueMismatch {
                            expected: DbType::$tag,
                            got: other.db_type(),
                        }),
                    }
                }
            }

            impl FromDbValue for $ty {
                fn from_db_value(value: DbValue) -> MapperResult<Self> {
                    <Option<$ty>>::from_db_value(value)?.ok_or(MapperError::UnexpectedNull {
                        expected: DbType::$tag,
                    })
                }
            }
        )+
    };
}

db_value_conversions!(
    Uuid => Uuid: Uuid,
    String => Text: Varchar,
    DateTime<Utc> => TimestampTz: TimestampTz,
    NaiveDateTime => Timestamp: Timestamp,
    bool => Bool: Boolean,
    i64 => BigInt: BigInt,
    i32 => Integer: Integer,
    i16 => SmallInt: SmallInt,
    f64 => Double: Double,
    f32 => Real: Real,
    Decimal => Numeric: Numeric,
    Vec<u8> => Bytes: Bytea,
);

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        Self::Text(Some(v.to_owned()))
    }
}

impl From<Option<&str>> for DbValue {
    fn from(v: Option<&str>) -> Self {
        Self::Text(v.map(str::to_owned))
    }
}

impl From<&[u8]> for DbValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(Some(v.to_vec()))
    }
}

static TYPE_TABLE: LazyLock<HashMap<TypeId, DbType>> = LazyLock::new(|| {
    let mut table = HashMap::new();
    register::<Uuid>(&mut table, DbType::Uuid);
    register::<String>(&mut table, DbType::Varchar);
    register::<&'static str>(&mut table, DbType::Varchar);
    register::<DateTime<Utc>>(&mut table, DbType::TimestampTz);
    register::<NaiveDateTime>(&mut table, DbType::Timestamp);
    register::<bool>(&mut table, DbType::Boolean);
    register::<i64>(&mut table, DbType::BigInt);
    register::<i32>(&mut table, DbType::Integer);
    register::<i16>(&mut table, DbType::SmallInt);
    register::<f64>(&mut table, DbType::Double);
    register::<f32>(&mut table, DbType::Real);
    register::<Decimal>(&mut table, DbType::Numeric);
    register::<Vec<u8>>(&mut table, DbType::Bytea);
    table
});

fn register<T: 'static>(table: &mut HashMap<TypeId, DbType>, db_type: DbType) {
    table.insert(TypeId::of::<T>(), db_type);
    table.insert(TypeId::of::<Option<T>>(), db_type);
}

/// Database type for a Rust type. `Option<T>` maps to the same tag as `T`.
///
/// # Errors
/// Returns [`MapperError::UnsupportedType`] naming the parameter `type` when
/// `T` is not in the table.
pub fn db_type_of<T: ?Sized + 'static>() -> MapperResult<DbType> {
    TYPE_TABLE
        .get(&TypeId::of::<T>())
        .copied()
        .ok_or_else(|| MapperError::unsupported_type(type_name::<T>()))
}
