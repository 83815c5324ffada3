//! Record store abstraction.
//!
//! The core never talks to a database directly; it consumes a narrow
//! [`RecordStore`] surface over `bots`, `workflows`, `user_workflows` and
//! `global_variables`. [`MemoryStore`] is the in-process implementation used
//! for embedding and tests; a persistent backend implements the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreResult;

// ============================================================================
// Records
// ============================================================================

/// A bot account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRecord {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Protocol the bot speaks.
    pub protocol: String,
    /// Protocol-specific config bag, validated at adapter start.
    pub config: Value,
    /// Owning user id.
    pub owner_id: i64,
    /// Whether the bot may be started.
    pub enabled: bool,
}

/// A workflow record. `config` holds the serialized
/// [`WorkflowSpec`](crate::workflow::WorkflowSpec) blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Whether the workflow participates in dispatch.
    pub enabled: bool,
    /// Lower fires earlier in enumeration.
    pub priority: i32,
    /// Opaque workflow config blob.
    pub config: Value,
    /// Authoring user id.
    pub creator_id: i64,
}

/// A per-user workflow subscription. Unique on `(user_id, workflow_id)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserWorkflowRecord {
    /// Subscribing user.
    pub user_id: i64,
    /// Subscribed workflow.
    pub workflow_id: i64,
    /// Whether the subscription is active.
    pub enabled: bool,
}

/// A process-wide configuration variable visible under `global.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariableRecord {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
    /// Secrets are masked in admin listings (they render normally in
    /// templates).
    pub is_secret: bool,
}

// ============================================================================
// RecordStore trait
// ============================================================================

/// Read surface over the persistent store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Looks up a bot by id.
    async fn bot(&self, id: i64) -> StoreResult<Option<BotRecord>>;

    /// Looks up a bot of `protocol` whose config field `field` equals
    /// `value`. Used for webhook routing (`app_id → bot`).
    async fn bot_by_config_field(
        &self,
        protocol: &str,
        field: &str,
        value: &str,
    ) -> StoreResult<Option<BotRecord>>;

    /// Returns all enabled bots owned by any of `owner_ids`.
    async fn bots_owned_by(&self, owner_ids: &[i64]) -> StoreResult<Vec<BotRecord>>;

    /// Returns all enabled bots.
    async fn enabled_bots(&self) -> StoreResult<Vec<BotRecord>>;

    /// Returns all enabled workflows ordered by ascending priority.
    async fn enabled_workflows(&self) -> StoreResult<Vec<WorkflowRecord>>;

    /// Returns the enabled subscriptions of one user.
    async fn subscriptions_for_user(&self, user_id: i64) -> StoreResult<Vec<UserWorkflowRecord>>;

    /// Returns the enabled subscriptions of one workflow.
    async fn subscribers_of_workflow(
        &self,
        workflow_id: i64,
    ) -> StoreResult<Vec<UserWorkflowRecord>>;

    /// Returns all global variables.
    async fn global_variables(&self) -> StoreResult<Vec<GlobalVariableRecord>>;

    /// Upserts a global variable.
    async fn set_global_variable(&self, record: GlobalVariableRecord) -> StoreResult<()>;

    /// Deletes a global variable by key.
    async fn delete_global_variable(&self, key: &str) -> StoreResult<()>;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
struct MemoryStoreInner {
    bots: HashMap<i64, BotRecord>,
    workflows: Vec<WorkflowRecord>,
    subscriptions: Vec<UserWorkflowRecord>,
    globals: HashMap<String, GlobalVariableRecord>,
}

/// In-memory [`RecordStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a bot record.
    pub fn put_bot(&self, bot: BotRecord) {
        self.inner.write().bots.insert(bot.id, bot);
    }

    /// Inserts or replaces a workflow record.
    pub fn put_workflow(&self, workflow: WorkflowRecord) {
        let mut inner = self.inner.write();
        inner.workflows.retain(|w| w.id != workflow.id);
        inner.workflows.push(workflow);
    }

    /// Inserts or replaces a subscription.
    pub fn put_subscription(&self, sub: UserWorkflowRecord) {
        let mut inner = self.inner.write();
        inner
            .subscriptions
            .retain(|s| !(s.user_id == sub.user_id && s.workflow_id == sub.workflow_id));
        inner.subscriptions.push(sub);
    }

    /// Inserts or replaces a global variable.
    pub fn put_global(&self, var: GlobalVariableRecord) {
        self.inner.write().globals.insert(var.key.clone(), var);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn bot(&self, id: i64) -> StoreResult<Option<BotRecord>> {
        Ok(self.inner.read().bots.get(&id).cloned())
    }

    async fn bot_by_config_field(
        &self,
        protocol: &str,
        field: &str,
        value: &str,
    ) -> StoreResult<Option<BotRecord>> {
        Ok(self
            .inner
            .read()
            .bots
            .values()
            .find(|b| {
                b.protocol == protocol
                    && b.config.get(field).and_then(Value::as_str) == Some(value)
            })
            .cloned())
    }

    async fn bots_owned_by(&self, owner_ids: &[i64]) -> StoreResult<Vec<BotRecord>> {
        Ok(self
            .inner
            .read()
            .bots
            .values()
            .filter(|b| b.enabled && owner_ids.contains(&b.owner_id))
            .cloned()
            .collect())
    }

    async fn enabled_bots(&self) -> StoreResult<Vec<BotRecord>> {
        let mut bots: Vec<BotRecord> = self
            .inner
            .read()
            .bots
            .values()
            .filter(|b| b.enabled)
            .cloned()
            .collect();
        bots.sort_by_key(|b| b.id);
        Ok(bots)
    }

    async fn enabled_workflows(&self) -> StoreResult<Vec<WorkflowRecord>> {
        let mut workflows: Vec<WorkflowRecord> = self
            .inner
            .read()
            .workflows
            .iter()
            .filter(|w| w.enabled)
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.priority);
        Ok(workflows)
    }

    async fn subscriptions_for_user(&self, user_id: i64) -> StoreResult<Vec<UserWorkflowRecord>> {
        Ok(self
            .inner
            .read()
            .subscriptions
            .iter()
            .filter(|s| s.enabled && s.user_id == user_id)
            .copied()
            .collect())
    }

    async fn subscribers_of_workflow(
        &self,
        workflow_id: i64,
    ) -> StoreResult<Vec<UserWorkflowRecord>> {
        Ok(self
            .inner
            .read()
            .subscriptions
            .iter()
            .filter(|s| s.enabled && s.workflow_id == workflow_id)
            .copied()
            .collect())
    }

    async fn global_variables(&self) -> StoreResult<Vec<GlobalVariableRecord>> {
        Ok(self.inner.read().globals.values().cloned().collect())
    }

    async fn set_global_variable(&self, record: GlobalVariableRecord) -> StoreResult<()> {
        self.inner.write().globals.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete_global_variable(&self, key: &str) -> StoreResult<()> {
        self.inner.write().globals.remove(key);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_bot_by_config_field() {
        let store = MemoryStore::new();
        store.put_bot(BotRecord {
            id: 1,
            name: "qq bot".into(),
            protocol: "qq".into(),
            config: json!({"app_id": "102001", "app_secret": "s"}),
            owner_id: 10,
            enabled: true,
        });

        let found = store
            .bot_by_config_field("qq", "app_id", "102001")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, 1);

        let missing = store
            .bot_by_config_field("qq", "app_id", "other")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_enabled_workflows_sorted_by_priority() {
        let store = MemoryStore::new();
        for (id, priority, enabled) in [(1, 50, true), (2, 10, true), (3, 1, false)] {
            store.put_workflow(WorkflowRecord {
                id,
                name: format!("wf{id}"),
                enabled,
                priority,
                config: json!({}),
                creator_id: 1,
            });
        }

        let workflows = store.enabled_workflows().await.unwrap();
        let ids: Vec<i64> = workflows.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_subscription_uniqueness() {
        let store = MemoryStore::new();
        store.put_subscription(UserWorkflowRecord {
            user_id: 1,
            workflow_id: 5,
            enabled: true,
        });
        store.put_subscription(UserWorkflowRecord {
            user_id: 1,
            workflow_id: 5,
            enabled: false,
        });

        // The replace keeps (user, workflow) unique; the disabled row hides it.
        assert!(store.subscriptions_for_user(1).await.unwrap().is_empty());
        assert!(store.subscribers_of_workflow(5).await.unwrap().is_empty());
    }
}
