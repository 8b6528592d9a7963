//! Shared service plumbing
//!
//! [`ServiceContext`] carries the pool, the permission registry and the
//! configuration every service reads. Services borrow it.

use std::sync::Arc;

use milkbank_core::{Action, Actor, Resource, Role};
use milkbank_permissions::PermissionRegistry;
use milkbank_persistence::Database;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::ServiceConfig;
use crate::error::{BusinessError, BusinessResult};

/// Largest page a list operation returns
pub const MAX_PER_PAGE: i64 = 100;
pub const DEFAULT_PER_PAGE: i64 = 20;

/// Context for business operations
#[derive(Clone)]
pub struct ServiceContext {
    pool: SqlitePool,
    permissions: Arc<PermissionRegistry>,
    config: Arc<ServiceConfig>,
}

impl ServiceContext {
    pub fn new(db: &Database, permissions: Arc<PermissionRegistry>, config: ServiceConfig) -> Self {
        Self::from_parts(db.pool().clone(), permissions, config)
    }

    pub fn from_parts(
        pool: SqlitePool,
        permissions: Arc<PermissionRegistry>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            pool,
            permissions,
            config: Arc::new(config),
        }
    }

    /// Get database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn permissions(&self) -> &PermissionRegistry {
        &self.permissions
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Single permission gate consulted on entry to every operation
    pub fn authorize(&self, actor: &Actor, resource: Resource, action: Action) -> BusinessResult<()> {
        Ok(self.permissions.authorize(actor, resource, action)?)
    }

    /// Donors may only act on their own records
    pub fn ensure_own_record(&self, actor: &Actor, donor_id: &str) -> BusinessResult<()> {
        if actor.role == Role::Donor && actor.id != donor_id {
            return Err(BusinessError::PermissionDenied(format!(
                "{} cannot access donor {}",
                actor, donor_id
            )));
        }
        Ok(())
    }
}

/// Pagination metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// One page of a list operation
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64, window: PageWindow) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + window.per_page - 1) / window.per_page
        };
        Self {
            data,
            pagination: Pagination {
                total,
                page: window.page,
                per_page: window.per_page,
                total_pages,
            },
        }
    }
}

/// Normalized `page` / `per_page` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub per_page: i64,
}

impl PageWindow {
    /// 1-based page; per_page clamped to `1..=MAX_PER_PAGE`
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(DEFAULT_PER_PAGE)
                .clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window() {
        let window = PageWindow::new(Some(3), Some(500));
        assert_eq!(window.per_page, MAX_PER_PAGE);
        assert_eq!(window.offset(), 200);

        let window = PageWindow::new(Some(0), None);
        assert_eq!(window.page, 1);
        assert_eq!(window.per_page, DEFAULT_PER_PAGE);
        assert_eq!(window.offset(), 0);
    }

    #[test]
    fn test_total_pages() {
        let window = PageWindow::new(Some(1), Some(20));
        let page: Page<i64> = Page::new(vec![], 41, window);
        assert_eq!(page.pagination.total_pages, 3);
        let page: Page<i64> = Page::new(vec![], 0, window);
        assert_eq!(page.pagination.total_pages, 0);
    }
}
