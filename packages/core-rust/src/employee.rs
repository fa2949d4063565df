//! Employee business entity and its reference data.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// An employee's organisational area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: i64,
    pub area: String,
}

/// An employee's role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub role: String,
}

/// An employee's work location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub location: String,
}

/// An employee record as exchanged on the wire and held by the store.
///
/// `id` is assigned by the store on creation; a value supplied by the caller
/// is ignored. Dates use ISO-8601 local date-time (`2021-04-08T12:30:00`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Employee {
    pub id: i64,
    pub name: Option<String>,
    pub area: Option<Area>,
    pub role: Option<Role>,
    pub location: Option<Location>,
    pub in_place: bool,
    pub contract: bool,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub archived: bool,
}
