//! In-memory [`EmployeeStore`] backed by [`DashMap`].

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use employee_core::Employee;

use crate::traits::EmployeeStore;

/// Employee repository held in process memory. Ids are assigned from a
/// monotonically increasing sequence starting at 1.
pub struct MemoryEmployeeStore {
    employees: DashMap<i64, Employee>,
    next_id: AtomicI64,
    writes: AtomicU64,
}

impl MemoryEmployeeStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            employees: DashMap::new(),
            next_id: AtomicI64::new(1),
            writes: AtomicU64::new(0),
        }
    }

    /// Total number of `save` calls that reached the store.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.employees.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }
}

impl Default for MemoryEmployeeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmployeeStore for MemoryEmployeeStore {
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Employee>> {
        Ok(self.employees.get(&id).map(|e| e.clone()))
    }

    async fn save(&self, mut employee: Employee) -> anyhow::Result<Employee> {
        if employee.id == 0 {
            employee.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        self.employees.insert(employee.id, employee.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(employee)
    }
}
