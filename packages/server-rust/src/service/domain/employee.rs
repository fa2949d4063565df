//! Employee request handlers: creation with business validation, and lookup
//! by id.

use employee_core::{Employee, RequestType, ResponseEnvelope};
use serde_json::Value;

use crate::service::operation::{OperationError, RouteRequest};
use crate::traits::EmployeeStore;

pub const NULL_EMPLOYEE: &str = "Employee object cannot be null during creation";
pub const CONTRACT_WITHOUT_END_DATE: &str = "A contracted employee must have an end-date";
pub const ARCHIVED_ON_CREATE: &str = "An archived employee cannot be created";
pub const MISSING_START_DATE: &str = "An employee's start date cannot be null";

/// First business rule a new employee violates, if any.
#[must_use]
pub fn validate_new_employee(employee: &Employee) -> Option<&'static str> {
    if employee.contract && employee.end_date.is_none() {
        Some(CONTRACT_WITHOUT_END_DATE)
    } else if employee.archived {
        Some(ARCHIVED_ON_CREATE)
    } else if employee.start_date.is_none() {
        Some(MISSING_START_DATE)
    } else {
        None
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    request_type: RequestType,
    payload: Value,
) -> Result<T, OperationError> {
    serde_json::from_value(payload)
        .map_err(|source| OperationError::InvalidPayload { request_type, source })
}

fn encode(employee: &Employee) -> Result<Value, OperationError> {
    serde_json::to_value(employee).map_err(|e| OperationError::Internal(e.into()))
}

/// `CREATE_EMPLOYEE`: validates and stores a new employee. The caller-supplied
/// id is ignored.
///
/// # Errors
///
/// `InvalidPayload` when the payload is not an employee object,
/// `Unavailable` when the store fails.
pub async fn create_employee(
    store: &dyn EmployeeStore,
    req: RouteRequest,
) -> Result<ResponseEnvelope, OperationError> {
    if req.payload.is_null() {
        return Ok(ResponseEnvelope::failure(NULL_EMPLOYEE));
    }
    let mut employee: Employee = decode(req.request_type, req.payload)?;
    if let Some(reason) = validate_new_employee(&employee) {
        return Ok(ResponseEnvelope::failure(reason));
    }

    employee.id = 0;
    let saved = store
        .save(employee)
        .await
        .map_err(OperationError::Unavailable)?;
    Ok(ResponseEnvelope::success(encode(&saved)?))
}

/// `GET_EMPLOYEE_BY_ID`: looks up an employee by numeric id.
///
/// # Errors
///
/// `InvalidPayload` when the payload is not an integer,
/// `Unavailable` when the store fails.
pub async fn get_employee_by_id(
    store: &dyn EmployeeStore,
    req: RouteRequest,
) -> Result<ResponseEnvelope, OperationError> {
    let id: i64 = decode(req.request_type, req.payload)?;
    match store
        .find_by_id(id)
        .await
        .map_err(OperationError::Unavailable)?
    {
        Some(employee) => Ok(ResponseEnvelope::success(encode(&employee)?)),
        None => Ok(ResponseEnvelope::failure(format!(
            "No employee with id [{id}] found"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryEmployeeStore;

    struct BrokenStore;

    #[async_trait]
    impl EmployeeStore for BrokenStore {
        async fn find_by_id(&self, _id: i64) -> anyhow::Result<Option<Employee>> {
            anyhow::bail!("connection refused")
        }

        async fn save(&self, _employee: Employee) -> anyhow::Result<Employee> {
            anyhow::bail!("connection refused")
        }
    }

    fn create(payload: Value) -> RouteRequest {
        RouteRequest::new("c1", RequestType::CreateEmployee, payload)
    }

    fn get(payload: Value) -> RouteRequest {
        RouteRequest::new("c1", RequestType::GetEmployeeById, payload)
    }

    fn valid_employee() -> Value {
        json!({
            "name": "A",
            "contract": false,
            "archived": false,
            "startDate": "2021-04-08T12:30:00"
        })
    }

    #[test]
    fn validation_order_reports_first_violation() {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
        let mut employee = Employee {
            contract: true,
            archived: true,
            ..Employee::default()
        };
        assert_eq!(validate_new_employee(&employee), Some(CONTRACT_WITHOUT_END_DATE));

        employee.end_date = start;
        assert_eq!(validate_new_employee(&employee), Some(ARCHIVED_ON_CREATE));

        employee.archived = false;
        assert_eq!(validate_new_employee(&employee), Some(MISSING_START_DATE));

        employee.start_date = start;
        assert_eq!(validate_new_employee(&employee), None);
    }

    #[tokio::test]
    async fn create_assigns_id_and_returns_saved_employee() {
        let store = MemoryEmployeeStore::new();
        let mut payload = valid_employee();
        payload["id"] = json!(99);

        let envelope = create_employee(&store, create(payload)).await.unwrap();

        assert!(envelope.success);
        let body = envelope.response_body.unwrap();
        assert_eq!(body["id"], json!(1));
        assert_eq!(body["name"], json!("A"));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn create_rejects_contract_without_end_date() {
        let store = MemoryEmployeeStore::new();
        let mut payload = valid_employee();
        payload["contract"] = json!(true);

        let envelope = create_employee(&store, create(payload)).await.unwrap();

        assert!(!envelope.success);
        assert_eq!(envelope.error_message.as_deref(), Some(CONTRACT_WITHOUT_END_DATE));
        assert!(envelope.response_body.is_none());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn create_rejects_null_payload() {
        let store = MemoryEmployeeStore::new();
        let envelope = create_employee(&store, create(Value::Null)).await.unwrap();
        assert_eq!(envelope.error_message.as_deref(), Some(NULL_EMPLOYEE));
    }

    #[tokio::test]
    async fn create_with_wrong_shape_is_invalid_payload() {
        let store = MemoryEmployeeStore::new();
        let err = create_employee(&store, create(json!("not an employee")))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn get_returns_stored_employee() {
        let store = MemoryEmployeeStore::new();
        create_employee(&store, create(valid_employee())).await.unwrap();

        let envelope = get_employee_by_id(&store, get(json!(1))).await.unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.response_body.unwrap()["name"], json!("A"));
    }

    #[tokio::test]
    async fn get_missing_employee_is_failed_envelope() {
        let store = MemoryEmployeeStore::new();
        let envelope = get_employee_by_id(&store, get(json!(42))).await.unwrap();
        assert!(!envelope.success);
        assert_eq!(
            envelope.error_message.as_deref(),
            Some("No employee with id [42] found")
        );
    }

    #[tokio::test]
    async fn get_with_non_integer_is_invalid_payload() {
        let store = MemoryEmployeeStore::new();
        let err = get_employee_by_id(&store, get(json!("abc"))).await.unwrap_err();
        assert!(matches!(
            err,
            OperationError::InvalidPayload {
                request_type: RequestType::GetEmployeeById,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn store_faults_are_unavailable() {
        let err = get_employee_by_id(&BrokenStore, get(json!(1))).await.unwrap_err();
        assert!(matches!(err, OperationError::Unavailable(_)));

        let err = create_employee(&BrokenStore, create(valid_employee()))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Unavailable(_)));
    }
}
