//! Scalar normalization for SQL Server rows crossing into JSON: timestamps to
//! canonical ISO-8601 text, decimals to floating point, binary to lowercase
//! hex. Same normalization the gateway's direct path applies to rows read
//! from its own pooled connection, and the same rules `database.py`'s
//! `execute_query` applied before handing rows to `json.dumps`.

use tiberius::Row;

pub fn column_to_json(row: &Row, idx: usize) -> serde_json::Value {
    use serde_json::Value;

    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
        return Value::from(v);
    }
    // DECIMAL/NUMERIC/MONEY/SMALLMONEY land here — tiberius's `FromSql for
    // f64` only covers the binary float wire types, not `ColumnData::Numeric`.
    if let Ok(Some(v)) = row.try_get::<tiberius::numeric::Decimal, _>(idx) {
        if let Ok(parsed) = v.to_string().parse::<f64>() {
            return Value::from(parsed);
        }
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
        return Value::from(v as f64);
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDate, _>(idx) {
        return Value::String(v.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(v)) = row.try_get::<&[u8], _>(idx) {
        return Value::String(hex::encode(v));
    }

    Value::Null
}
