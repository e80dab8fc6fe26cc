// PostgreSQL executor on top of the shared deadpool connection pool
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::Pool;
use serde_json::{json, Value};
use tokio_postgres::types::{FromSql, Kind, Type};

use crate::models::Row;
use crate::services::database::adapter::{ExecutionError, SqlExecutor};

pub struct PostgresExecutor {
    pool: Pool,
    timeout_secs: u64,
}

impl PostgresExecutor {
    pub fn new(pool: Pool, timeout_secs: u64) -> Self {
        Self { pool, timeout_secs }
    }
}

#[async_trait::async_trait]
impl SqlExecutor for PostgresExecutor {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| ExecutionError::Pool(e.to_string()))?;

        let start_time = Instant::now();

        // Extended protocol: the server refuses more than one statement here.
        let rows = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            client.query(sql, &[]),
        )
        .await
        .map_err(|_| ExecutionError::Timeout(self.timeout_secs))?
        .map_err(|e| {
            let details = if let Some(db_error) = e.as_db_error() {
                format!("Code: {}, Message: {}", db_error.code().code(), db_error.message())
            } else {
                e.to_string()
            };
            ExecutionError::Query(details)
        })?;

        let results: Vec<Row> = rows.iter().map(row_to_json).collect();

        tracing::info!(
            "Query returned {} row(s) in {} ms",
            results.len(),
            start_time.elapsed().as_millis()
        );

        Ok(results)
    }
}

fn row_to_json(row: &tokio_postgres::Row) -> Row {
    let mut row_obj = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        row_obj.insert(column.name().to_string(), column_value(row, idx, column.type_()));
    }
    row_obj
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn column_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    let value = match *ty {
        Type::INT2 => get::<i16>(row, idx).map(|v| json!(v)),
        Type::INT4 => get::<i32>(row, idx).map(|v| json!(v)),
        Type::INT8 => get::<i64>(row, idx).map(|v| json!(v)),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| json!(v)),
        Type::FLOAT8 => get::<f64>(row, idx).map(|v| json!(v)),
        Type::NUMERIC => get::<PgNumeric>(row, idx).map(|v| v.into_json()),
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            get::<String>(row, idx).map(Value::String)
        }
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx).map(|v| json!(v.to_string())),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx).map(|v| json!(v.to_rfc3339())),
        Type::DATE => get::<NaiveDate>(row, idx).map(|v| json!(v.to_string())),
        Type::TIME => get::<NaiveTime>(row, idx).map(|v| json!(v.to_string())),
        Type::JSON | Type::JSONB => get::<Value>(row, idx),
        _ if matches!(ty.kind(), Kind::Enum(_)) => {
            get::<EnumLabel>(row, idx).map(|v| Value::String(v.0))
        }
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(_) => {
                tracing::warn!("Unsupported column type {}, returning a placeholder", ty.name());
                Some(json!(format!("<{}>", ty.name())))
            }
        },
    };
    value.unwrap_or(Value::Null)
}

/// Label of a Postgres enum value (sent as its text)
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(EnumLabel(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// NUMERIC decoded from the binary wire format into its decimal text
struct PgNumeric(String);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl PgNumeric {
    fn decode(raw: &[u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        if raw.len() < 8 {
            return Err("numeric value too short".into());
        }
        let word = |i: usize| i16::from_be_bytes([raw[i], raw[i + 1]]);
        let ndigits = word(0).max(0) as usize;
        let weight = word(2) as i32;
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = u16::from_be_bytes([raw[6], raw[7]]) as usize;

        match sign {
            NUMERIC_NAN => return Ok(PgNumeric("NaN".to_string())),
            NUMERIC_PINF => return Ok(PgNumeric("Infinity".to_string())),
            NUMERIC_NINF => return Ok(PgNumeric("-Infinity".to_string())),
            0 | NUMERIC_NEG => {}
            other => return Err(format!("unknown numeric sign word {:#06x}", other).into()),
        }
        if raw.len() < 8 + ndigits * 2 {
            return Err("numeric value truncated".into());
        }
        // Base-10000 digit groups, most significant first
        let digit = |i: i32| -> i16 {
            if i < 0 || i as usize >= ndigits {
                0
            } else {
                word(8 + i as usize * 2)
            }
        };

        let mut text = String::new();
        if sign == NUMERIC_NEG {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            text.push_str(&digit(0).to_string());
            for i in 1..=weight {
                text.push_str(&format!("{:04}", digit(i)));
            }
        }

        if dscale > 0 {
            let mut fraction = String::new();
            let mut i = weight + 1;
            while fraction.len() < dscale {
                fraction.push_str(&format!("{:04}", digit(i)));
                i += 1;
            }
            fraction.truncate(dscale);
            text.push('.');
            text.push_str(&fraction);
        }

        Ok(PgNumeric(text))
    }

    fn into_json(self) -> Value {
        match self.0.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            Some(n) => Value::Number(n),
            None => Value::String(self.0),
        }
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        PgNumeric::decode(raw)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}
