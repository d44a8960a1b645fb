//! Group membership subscriber.
//!
//! Learns user to role mappings from the group mutation channel. The
//! [`RoleRegistry`] belongs to one [`GroupRoleSubscription`]: it is created
//! empty on subscribe and cleared on stop.

use crate::ConsumerError;
use futures::StreamExt;
use rsvp_core::event_bus::{Delivery, EventBus};
use rsvp_core::ids::{GroupId, UserId};
use rsvp_core::message::{GroupMutation, GroupRole};
use rsvp_runtime::metrics::ConsumerMetrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type Roles = HashMap<GroupId, HashMap<UserId, GroupRole>>;

/// Mutex-guarded group to member to role map.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    inner: Arc<Mutex<Roles>>,
}

impl RoleRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Roles> {
        // Writers never leave the map half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Role of `user_id` in `group_id`, if known.
    #[must_use]
    pub fn role_of(&self, group_id: GroupId, user_id: &UserId) -> Option<GroupRole> {
        self.lock()
            .get(&group_id)
            .and_then(|members| members.get(user_id))
            .copied()
    }

    /// Known members of a group, sorted by user id.
    #[must_use]
    pub fn members(&self, group_id: GroupId) -> Vec<(UserId, GroupRole)> {
        let mut members: Vec<_> = self
            .lock()
            .get(&group_id)
            .map(|m| m.iter().map(|(u, r)| (u.clone(), *r)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        members
    }

    /// Apply a decoded mutation.
    pub fn apply(&self, mutation: GroupMutation) {
        let mut roles = self.lock();
        match mutation {
            GroupMutation::Replace(snapshot) => {
                let members = snapshot
                    .members
                    .into_iter()
                    .map(|m| (m.user_id, m.role))
                    .collect();
                roles.insert(snapshot.group_id, members);
            }
            GroupMutation::Remove(group_id) => {
                roles.remove(&group_id);
            }
        }
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of known groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no group is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Starts [`GroupRoleSubscription`]s.
pub struct GroupRoleSubscriber;

impl GroupRoleSubscriber {
    /// Subscribe to `topic` and keep a fresh registry up to date in a
    /// background task.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscription`] if the bus refuses the
    /// subscription.
    pub async fn subscribe(
        event_bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
    ) -> Result<GroupRoleSubscription, ConsumerError> {
        let topic = topic.into();
        let mut deliveries = event_bus.subscribe(&[topic.as_str()]).await?;
        let registry = RoleRegistry::new();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tracing::info!(topic = %topic, "Subscribed to group mutations");

        let task_registry = registry.clone();
        let task = tokio::spawn(async move {
            while !*shutdown_rx.borrow() {
                tokio::select! {
                    biased;

                    // A dropped sender means the subscription is gone.
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }

                    next = deliveries.next() => match next {
                        Some(Ok(delivery)) => handle(&task_registry, delivery),
                        Some(Err(e)) => {
                            tracing::error!(topic = %topic, error = ?e, "Error receiving group mutation");
                        }
                        None => break,
                    }
                }
            }
            task_registry.clear();
            tracing::info!(topic = %topic, "Group mutation subscriber stopped");
        });

        Ok(GroupRoleSubscription {
            registry,
            shutdown: shutdown_tx,
            task: Some(task),
        })
    }
}

fn handle(registry: &RoleRegistry, delivery: Delivery) {
    match GroupMutation::decode(&delivery.message) {
        Ok(mutation) => {
            match &mutation {
                GroupMutation::Replace(snapshot) => tracing::debug!(
                    group_id = %snapshot.group_id,
                    members = snapshot.members.len(),
                    "Group members replaced"
                ),
                GroupMutation::Remove(group_id) => {
                    tracing::debug!(group_id = %group_id, "Group removed");
                }
            }
            registry.apply(mutation);
            ConsumerMetrics::record_consumed("applied");
        }
        Err(e) => {
            tracing::warn!(topic = %delivery.topic, error = %e, "Dropping malformed group mutation");
            ConsumerMetrics::record_consumed("dropped");
        }
    }
    delivery.ack.ack();
}

/// A running group subscriber and the registry it owns.
///
/// Dropping the subscription stops the background task, which clears the
/// registry on its way out.
#[derive(Debug)]
pub struct GroupRoleSubscription {
    registry: RoleRegistry,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl GroupRoleSubscription {
    /// Handle to the live registry.
    #[must_use]
    pub fn registry(&self) -> RoleRegistry {
        self.registry.clone()
    }

    /// Stop the background task, wait for it and clear the registry.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Group subscriber task failed");
            }
        }
        self.registry.clear();
    }
}

impl Drop for GroupRoleSubscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
