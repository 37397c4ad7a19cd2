//! # Employee-Lookup Executor
//!
//! Answers `EMPLOYEE_LOOKUP_REQUEST` frames with a four-strategy cascade,
//! generalized from `connection.py::_handle_employee_lookup_request`: exact
//! employee-code match, exact card match, exact name match, then a partial
//! name match capped at five rows. Table and column names come from
//! `EmployeeSchemaConfig` rather than the original's hardcoded
//! `EmployeeMaster`/`CorpEmpCode`/etc, since a second installation may not
//! share the same schema; the `DesignationMaster` join stays fixed, as the
//! original never exposed it as configurable either.

use crate::config::EmployeeSchemaConfig;
use crate::sql_executor::SqlExecutor;
use gateway_protocol::{EmployeeLookupStatus, EmployeeLookupType, GatewayError};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct EmployeeLookupOutcome {
    pub status: EmployeeLookupStatus,
    pub employee: Option<HashMap<String, Value>>,
    pub employees: Vec<HashMap<String, Value>>,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
}

pub struct EmployeeLookupExecutor<'a> {
    sql: &'a SqlExecutor,
    schema: &'a EmployeeSchemaConfig,
}

impl<'a> EmployeeLookupExecutor<'a> {
    pub fn new(sql: &'a SqlExecutor, schema: &'a EmployeeSchemaConfig) -> Self {
        Self { sql, schema }
    }

    fn select_clause(&self) -> String {
        format!(
            "SELECT e.Ecode, e.{code} AS CorpEmpCode, e.{name} AS EmpName, \
             des.DesName AS Designation, ecr.{card} AS CardNo, e.E_mail, e.Telephone1, e.Active \
             FROM {table} e \
             LEFT JOIN DesignationMaster des ON e.DesCode = des.DesCode \
             LEFT JOIN {card_table} ecr ON e.Ecode = ecr.ECode AND ecr.Status = 1",
            code = self.schema.code_column,
            name = self.schema.name_column,
            card = self.schema.card_column,
            table = self.schema.employee_table,
            card_table = self.schema.card_table,
        )
    }

    pub async fn lookup(&self, identifier: &str, lookup_type: EmployeeLookupType, timeout: Duration) -> EmployeeLookupOutcome {
        let start = Instant::now();
        let select = self.select_clause();

        let try_code = matches!(lookup_type, EmployeeLookupType::Auto | EmployeeLookupType::Code);
        let try_card = matches!(lookup_type, EmployeeLookupType::Auto | EmployeeLookupType::Card);
        let try_name = matches!(lookup_type, EmployeeLookupType::Auto | EmployeeLookupType::Name);

        if try_code {
            let sql = format!("{select} WHERE e.{} = @P1", self.schema.code_column);
            match self.sql.query_params(&sql, &[identifier], timeout).await {
                Ok(rows) if !rows.is_empty() => {
                    return self.success(row_to_employee(&rows[0]), start);
                }
                Err(err) => return self.error(&err, start),
                _ => {}
            }
        }

        if try_card {
            let sql = format!("{select} WHERE ecr.{} = @P1", self.schema.card_column);
            match self.sql.query_params(&sql, &[identifier], timeout).await {
                Ok(rows) if !rows.is_empty() => {
                    return self.success(row_to_employee(&rows[0]), start);
                }
                Err(err) => return self.error(&err, start),
                _ => {}
            }
        }

        if try_name {
            let sql = format!("{select} WHERE LOWER(e.{}) = LOWER(@P1)", self.schema.name_column);
            match self.sql.query_params(&sql, &[identifier], timeout).await {
                Ok(rows) if rows.len() == 1 => return self.success(row_to_employee(&rows[0]), start),
                Ok(rows) if rows.len() > 1 => return self.multiple(rows, start),
                Err(err) => return self.error(&err, start),
                _ => {}
            }

            let partial_sql = format!(
                "SELECT TOP 5 e.Ecode, e.{code} AS CorpEmpCode, e.{name} AS EmpName, \
                 des.DesName AS Designation, ecr.{card} AS CardNo, e.E_mail, e.Telephone1, e.Active \
                 FROM {table} e \
                 LEFT JOIN DesignationMaster des ON e.DesCode = des.DesCode \
                 LEFT JOIN {card_table} ecr ON e.Ecode = ecr.ECode AND ecr.Status = 1 \
                 WHERE LOWER(e.{name}) LIKE LOWER(@P1)",
                code = self.schema.code_column,
                name = self.schema.name_column,
                card = self.schema.card_column,
                table = self.schema.employee_table,
                card_table = self.schema.card_table,
            );
            let pattern = format!("%{identifier}%");
            match self.sql.query_params(&partial_sql, &[&pattern], timeout).await {
                Ok(rows) if rows.len() == 1 => return self.success(row_to_employee(&rows[0]), start),
                Ok(rows) if rows.len() > 1 => return self.multiple(rows, start),
                Err(err) => return self.error(&err, start),
                _ => {}
            }
        }

        EmployeeLookupOutcome {
            status: EmployeeLookupStatus::NotFound,
            employee: None,
            employees: Vec::new(),
            execution_time_ms: start.elapsed().as_millis() as u64,
            error_message: Some(format!("no employee found for identifier: {identifier}")),
        }
    }

    fn success(&self, employee: HashMap<String, Value>, start: Instant) -> EmployeeLookupOutcome {
        EmployeeLookupOutcome {
            status: EmployeeLookupStatus::Success,
            employee: Some(employee),
            employees: Vec::new(),
            execution_time_ms: start.elapsed().as_millis() as u64,
            error_message: None,
        }
    }

    fn multiple(&self, rows: Vec<HashMap<String, Value>>, start: Instant) -> EmployeeLookupOutcome {
        let employees: Vec<_> = rows.iter().map(row_to_employee).collect();
        EmployeeLookupOutcome {
            status: EmployeeLookupStatus::MultipleFound,
            employee: employees.first().cloned(),
            error_message: Some(format!("multiple employees found ({})", employees.len())),
            employees,
            execution_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Maps the underlying transport failure to the matching wire status,
    /// the same way `http_executor`'s `ApiStatus` mapping distinguishes a
    /// timeout or a dropped connection from a generic error.
    fn error(&self, err: &GatewayError, start: Instant) -> EmployeeLookupOutcome {
        let status = match err {
            GatewayError::Timeout(_) => EmployeeLookupStatus::Timeout,
            GatewayError::QueryError { error_code: Some(code), .. } if code == "CONNECTION_ERROR" => {
                EmployeeLookupStatus::ConnectionError
            }
            _ => EmployeeLookupStatus::Error,
        };
        EmployeeLookupOutcome {
            status,
            employee: None,
            employees: Vec::new(),
            execution_time_ms: start.elapsed().as_millis() as u64,
            error_message: Some(err.to_string()),
        }
    }
}

fn row_to_employee(row: &HashMap<String, Value>) -> HashMap<String, Value> {
    let get = |key: &str| row.get(key).cloned().unwrap_or(Value::Null);
    let mut out = HashMap::new();
    out.insert("ecode".to_string(), get("Ecode"));
    out.insert(
        "corp_emp_code".to_string(),
        Value::String(get("CorpEmpCode").as_str().unwrap_or_default().to_string()),
    );
    out.insert(
        "name".to_string(),
        match get("EmpName") {
            Value::Null => Value::String("Unknown".to_string()),
            v => v,
        },
    );
    out.insert("department".to_string(), get("Department"));
    out.insert("designation".to_string(), get("Designation"));
    out.insert("card_no".to_string(), get("CardNo"));
    out.insert("email".to_string(), get("E_mail"));
    out.insert("phone".to_string(), get("Telephone1"));
    out.insert(
        "active".to_string(),
        Value::Bool(match get("Active") {
            Value::Bool(b) => b,
            Value::Null => true,
            v => v.as_i64().map(|n| n != 0).unwrap_or(true),
        }),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_to_employee_defaults_active_true_when_missing() {
        let mut row = HashMap::new();
        row.insert("EmpName".to_string(), Value::String("Jane Doe".to_string()));
        let employee = row_to_employee(&row);
        assert_eq!(employee["active"], Value::Bool(true));
        assert_eq!(employee["name"], Value::String("Jane Doe".to_string()));
    }

    #[test]
    fn row_to_employee_falls_back_to_unknown_name() {
        let row = HashMap::new();
        let employee = row_to_employee(&row);
        assert_eq!(employee["name"], Value::String("Unknown".to_string()));
    }

    fn executor(schema: &EmployeeSchemaConfig, sql: &SqlExecutor) -> EmployeeLookupExecutor<'_> {
        EmployeeLookupExecutor::new(sql, schema)
    }

    #[test]
    fn timeout_error_maps_to_timeout_status() {
        let schema = EmployeeSchemaConfig::default();
        let sql = SqlExecutor::new(Default::default());
        let outcome = executor(&schema, &sql).error(&GatewayError::Timeout(5), Instant::now());
        assert_eq!(outcome.status, EmployeeLookupStatus::Timeout);
    }

    #[test]
    fn connection_error_code_maps_to_connection_error_status() {
        let schema = EmployeeSchemaConfig::default();
        let sql = SqlExecutor::new(Default::default());
        let err = GatewayError::QueryError {
            message: "broken pipe".into(),
            error_code: Some("CONNECTION_ERROR".into()),
        };
        let outcome = executor(&schema, &sql).error(&err, Instant::now());
        assert_eq!(outcome.status, EmployeeLookupStatus::ConnectionError);
    }

    #[test]
    fn generic_query_error_maps_to_error_status() {
        let schema = EmployeeSchemaConfig::default();
        let sql = SqlExecutor::new(Default::default());
        let err = GatewayError::QueryError {
            message: "syntax error".into(),
            error_code: None,
        };
        let outcome = executor(&schema, &sql).error(&err, Instant::now());
        assert_eq!(outcome.status, EmployeeLookupStatus::Error);
    }
}
