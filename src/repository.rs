//! Query execution against the listings database.
//!
//! [`PropertyRepository`] is the seam between the search service and
//! storage. Templates reach it only after validation; values are always bound
//! positionally and never spliced into the SQL text.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::sync::Mutex;

use crate::assemble::to_driver_sql;
use crate::error::ExecutionError;
use crate::models::{ParamValue, ParsedParameters, SqlTemplate};

/// One result row, column name → JSON value.
pub type PropertyRow = Map<String, Value>;

#[async_trait]
pub trait PropertyRepository: Send + Sync {
    async fn search(
        &self,
        template: &SqlTemplate,
        params: &ParsedParameters,
    ) -> Result<Vec<PropertyRow>, ExecutionError>;

    async fn health_check(&self) -> bool;
}

pub struct MySqlPropertyRepository {
    pool: MySqlPool,
    placeholder: String,
}

impl MySqlPropertyRepository {
    pub fn new(pool: MySqlPool, placeholder: &str) -> Self {
        Self {
            pool,
            placeholder: placeholder.to_string(),
        }
    }
}

#[async_trait]
impl PropertyRepository for MySqlPropertyRepository {
    async fn search(
        &self,
        template: &SqlTemplate,
        params: &ParsedParameters,
    ) -> Result<Vec<PropertyRow>, ExecutionError> {
        let driver = to_driver_sql(template.as_str(), &self.placeholder)
            .map_err(|e| ExecutionError(e.to_string()))?;
        if driver.slots != params.len() {
            return Err(ExecutionError(format!(
                "statement has {} bind slots but {} params were provided",
                driver.slots,
                params.len()
            )));
        }

        let mut query = sqlx::query(&driver.sql);
        for param in params.iter() {
            query = match param {
                ParamValue::Null => query.bind(None::<String>),
                ParamValue::Bool(b) => query.bind(*b),
                ParamValue::Int(i) => query.bind(*i),
                ParamValue::Float(f) => query.bind(*f),
                ParamValue::Text(s) => query.bind(s.as_str()),
            };
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "query execution failed");
            ExecutionError(e.to_string())
        })?;

        tracing::debug!(rows = rows.len(), "query executed");
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "database health check failed");
                false
            }
        }
    }
}

fn row_to_json(row: &MySqlRow) -> PropertyRow {
    row.columns()
        .iter()
        .map(|col| {
            let value = decode_column(row, col.ordinal(), col.type_info().name());
            (col.name().to_string(), value)
        })
        .collect()
}

fn decode_column(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let decoded = match type_name {
        "BOOLEAN" => row.try_get::<bool, _>(idx).ok().map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(idx).ok().map(Value::from)
        }
        t if t.ends_with("UNSIGNED") => row.try_get::<u64, _>(idx).ok().map(Value::from),
        "FLOAT" => row
            .try_get::<f32, _>(idx)
            .ok()
            .and_then(|f| float(f as f64)),
        "DOUBLE" => row.try_get::<f64, _>(idx).ok().and_then(float),
        "DECIMAL" => row
            .try_get::<Decimal, _>(idx)
            .ok()
            .and_then(|d| d.to_f64())
            .and_then(float),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string())),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .map(|d| Value::String(d.to_string())),
        _ => None,
    };

    decoded
        .or_else(|| row.try_get::<String, _>(idx).ok().map(Value::String))
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(idx)
                .ok()
                .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
        })
        .unwrap_or(Value::Null)
}

fn float(f: f64) -> Option<Value> {
    serde_json::Number::from_f64(f).map(Value::Number)
}

/// Repository serving fixed rows. Records every executed statement so
/// callers can assert on what reached storage.
#[derive(Default)]
pub struct InMemoryPropertyRepository {
    rows: Vec<PropertyRow>,
    healthy: bool,
    failure: Option<String>,
    executed: Mutex<Vec<(String, ParsedParameters)>>,
}

impl InMemoryPropertyRepository {
    pub fn new(rows: Vec<PropertyRow>) -> Self {
        Self {
            rows,
            healthy: true,
            ..Default::default()
        }
    }

    pub fn unhealthy() -> Self {
        Self::default()
    }

    /// Every `search` fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            healthy: true,
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn executed(&self) -> Vec<(String, ParsedParameters)> {
        self.executed
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PropertyRepository for InMemoryPropertyRepository {
    async fn search(
        &self,
        template: &SqlTemplate,
        params: &ParsedParameters,
    ) -> Result<Vec<PropertyRow>, ExecutionError> {
        if let Ok(mut log) = self.executed.lock() {
            log.push((template.sql.clone(), params.clone()));
        }
        match &self.failure {
            Some(message) => Err(ExecutionError(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}
