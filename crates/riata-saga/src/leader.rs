//! Lease-based cluster leadership.
//!
//! When several coordinator instances share one store, exactly one of them
//! may run the reconciliation engine at a time. Leadership is a single
//! lease row: the master refreshes its expiry every tick, and any slave may
//! take the row over once the expiry passes without a refresh.
//!
//! ## Design Principles
//!
//! - **Leases, not locks**: a crashed master is superseded after one lease
//!   period with no coordination
//! - **Store decides races**: insert, refresh, and takeover are conditional
//!   writes; losing a race demotes to slave, never errors
//! - **Fail closed**: any store error demotes to slave for the tick

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::error::Result;

pub use memory::MemoryLeaseStore;

/// Leadership state of one coordinator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No tick has run yet, or leadership was voluntarily released.
    Unlocked,
    /// This instance holds the lease and runs the reconciliation engine.
    Master,
    /// Another instance holds the lease.
    Slave,
}

impl Role {
    /// Returns true when this instance may run the reconciliation engine.
    #[must_use]
    pub const fn is_master(self) -> bool {
        matches!(self, Self::Master)
    }
}

/// The single leadership lease row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterLease {
    /// Coordinator service name the lease belongs to.
    pub service_name: String,
    /// Instance currently holding the lease.
    pub instance_id: String,
    /// When the current holder first acquired the lease.
    pub locked_time: DateTime<Utc>,
    /// When the lease lapses unless refreshed.
    pub expire_time: DateTime<Utc>,
}

impl MasterLease {
    /// Returns true when the lease lapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_time <= now
    }

    fn is_held_by(&self, service_name: &str, instance_id: &str) -> bool {
        self.service_name == service_name && self.instance_id == instance_id
    }
}

/// Storage contract for the leadership lease.
///
/// All writes are conditional; a `false` return means another instance won
/// the race and the caller must demote itself.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Reads the lease row, if one exists.
    async fn get(&self) -> Result<Option<MasterLease>>;

    /// Inserts the lease row. Fails the condition (returns `false`) when a
    /// row already exists.
    async fn insert(&self, lease: MasterLease) -> Result<bool>;

    /// Extends the expiry of a lease still held by
    /// `(service_name, instance_id)`. Returns `false` when the row is
    /// missing or held by someone else.
    async fn refresh(
        &self,
        service_name: &str,
        instance_id: &str,
        expire_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// Replaces the lease row with `lease`, conditional on the current row
    /// still carrying `expected_expire_time`. Returns `false` when the row
    /// changed underneath the caller.
    async fn takeover(
        &self,
        lease: MasterLease,
        expected_expire_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// Deletes the lease row if held by `(service_name, instance_id)`.
    async fn delete_owned(&self, service_name: &str, instance_id: &str) -> Result<bool>;
}

#[async_trait]
impl<T: LeaseStore + ?Sized> LeaseStore for std::sync::Arc<T> {
    async fn get(&self) -> Result<Option<MasterLease>> {
        (**self).get().await
    }

    async fn insert(&self, lease: MasterLease) -> Result<bool> {
        (**self).insert(lease).await
    }

    async fn refresh(
        &self,
        service_name: &str,
        instance_id: &str,
        expire_time: DateTime<Utc>,
    ) -> Result<bool> {
        (**self).refresh(service_name, instance_id, expire_time).await
    }

    async fn takeover(
        &self,
        lease: MasterLease,
        expected_expire_time: DateTime<Utc>,
    ) -> Result<bool> {
        (**self).takeover(lease, expected_expire_time).await
    }

    async fn delete_owned(&self, service_name: &str, instance_id: &str) -> Result<bool> {
        (**self).delete_owned(service_name, instance_id).await
    }
}

/// One instance's view of the leadership lease, advanced by periodic ticks.
pub struct ClusterLeadership<L> {
    store: L,
    service_name: String,
    instance_id: String,
    lease_duration: Duration,
    role: Role,
}

impl<L: LeaseStore> ClusterLeadership<L> {
    /// Creates a leadership handle for one instance.
    pub fn new(
        store: L,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            store,
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            lease_duration,
            role: Role::Unlocked,
        }
    }

    /// The current role, as of the last tick.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns true when this instance held the lease at the last tick.
    #[must_use]
    pub const fn is_master(&self) -> bool {
        self.role.is_master()
    }

    /// Advances the lease state machine by one tick at `now`.
    ///
    /// A store failure is not propagated: the instance demotes itself to
    /// slave and retries on the next tick.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Role {
        let previous = self.role;
        self.role = match self.try_hold(now).await {
            Ok(role) => role,
            Err(err) => {
                warn!(
                    instance_id = %self.instance_id,
                    error = %err,
                    "lease store unavailable, stepping down"
                );
                Role::Slave
            }
        };

        if self.role != previous {
            info!(
                service_name = %self.service_name,
                instance_id = %self.instance_id,
                role = ?self.role,
                "leadership role changed"
            );
        }
        self.role
    }

    /// Voluntarily releases the lease for orderly shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails; the role is reset to
    /// unlocked either way.
    pub async fn relinquish(&mut self) -> Result<()> {
        self.role = Role::Unlocked;
        self.store
            .delete_owned(&self.service_name, &self.instance_id)
            .await?;
        Ok(())
    }

    async fn try_hold(&self, now: DateTime<Utc>) -> Result<Role> {
        let Some(lease) = self.store.get().await? else {
            let inserted = self.store.insert(self.lease_at(now)).await?;
            return Ok(if inserted { Role::Master } else { Role::Slave });
        };

        if lease.is_held_by(&self.service_name, &self.instance_id) {
            let refreshed = self
                .store
                .refresh(
                    &self.service_name,
                    &self.instance_id,
                    now + self.lease_duration,
                )
                .await?;
            return Ok(if refreshed { Role::Master } else { Role::Slave });
        }

        if lease.is_expired_at(now) {
            let taken = self
                .store
                .takeover(self.lease_at(now), lease.expire_time)
                .await?;
            return Ok(if taken { Role::Master } else { Role::Slave });
        }

        Ok(Role::Slave)
    }

    fn lease_at(&self, now: DateTime<Utc>) -> MasterLease {
        MasterLease {
            service_name: self.service_name.clone(),
            instance_id: self.instance_id.clone(),
            locked_time: now,
            expire_time: now + self.lease_duration,
        }
    }
}

impl<L> std::fmt::Debug for ClusterLeadership<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterLeadership")
            .field("service_name", &self.service_name)
            .field("instance_id", &self.instance_id)
            .field("role", &self.role)
            .finish()
    }
}
