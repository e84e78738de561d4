//! In-memory lease store.
//!
//! Single-process implementation of [`LeaseStore`] for tests and embedded
//! deployments. All conditional writes happen under one write lock, so
//! races between instances sharing the store resolve exactly like the
//! row-level conditional updates of a durable backend.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{LeaseStore, MasterLease};
use crate::error::{Error, Result};

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory implementation of the leadership lease row.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    lease: RwLock<Option<MasterLease>>,
}

impl MemoryLeaseStore {
    /// Creates an empty lease store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn get(&self) -> Result<Option<MasterLease>> {
        let lease = self.lease.read().map_err(poison_err)?;
        Ok(lease.clone())
    }

    async fn insert(&self, new: MasterLease) -> Result<bool> {
        let mut lease = self.lease.write().map_err(poison_err)?;
        if lease.is_some() {
            return Ok(false);
        }
        *lease = Some(new);
        drop(lease);

        Ok(true)
    }

    async fn refresh(
        &self,
        service_name: &str,
        instance_id: &str,
        expire_time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut lease = self.lease.write().map_err(poison_err)?;
        let Some(current) = lease.as_mut() else {
            return Ok(false);
        };
        if current.service_name != service_name || current.instance_id != instance_id {
            return Ok(false);
        }
        current.expire_time = expire_time;
        drop(lease);

        Ok(true)
    }

    async fn takeover(
        &self,
        new: MasterLease,
        expected_expire_time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut lease = self.lease.write().map_err(poison_err)?;
        let Some(current) = lease.as_ref() else {
            return Ok(false);
        };
        if current.expire_time != expected_expire_time {
            return Ok(false);
        }
        *lease = Some(new);
        drop(lease);

        Ok(true)
    }

    async fn delete_owned(&self, service_name: &str, instance_id: &str) -> Result<bool> {
        let mut lease = self.lease.write().map_err(poison_err)?;
        let owned = lease
            .as_ref()
            .is_some_and(|l| l.service_name == service_name && l.instance_id == instance_id);
        if owned {
            *lease = None;
        }
        drop(lease);

        Ok(owned)
    }
}
