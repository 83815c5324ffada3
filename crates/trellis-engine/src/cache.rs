//! Workflow cache.
//!
//! An in-memory snapshot of the enabled workflows with precompiled engines,
//! so the hot dispatch path never touches the record store for workflow
//! bodies. Reloads replace the whole list atomically; readers hold an `Arc`
//! to a consistent snapshot and may observe a slightly stale engine until
//! the next reload.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use trellis_core::{RecordStore, StoreResult, TriggerType, WorkflowSpec};

use crate::engine::WorkflowEngine;
use crate::registry::NodeRegistry;
use crate::services::EngineServices;

/// One cached workflow with its precompiled engine.
pub struct CachedWorkflow {
    /// Workflow id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Dispatch ordering hint (lower = earlier).
    pub priority: i32,
    /// Trigger classification.
    pub trigger_type: TriggerType,
    /// Parsed spec.
    pub spec: WorkflowSpec,
    /// Precompiled engine.
    pub engine: WorkflowEngine,
}

/// Point-in-time snapshot of active workflows.
pub struct WorkflowCache {
    store: Arc<dyn RecordStore>,
    registry: Arc<NodeRegistry>,
    services: Arc<EngineServices>,
    snapshot: RwLock<Arc<Vec<Arc<CachedWorkflow>>>>,
}

impl WorkflowCache {
    /// Creates an empty cache.
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<NodeRegistry>,
        services: Arc<EngineServices>,
    ) -> Self {
        Self {
            store,
            registry,
            services,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Reloads all enabled workflows from the store, precompiling engines.
    /// Returns the number of cached workflows.
    pub async fn reload(&self) -> StoreResult<usize> {
        let records = self.store.enabled_workflows().await?;

        let mut cached = Vec::with_capacity(records.len());
        for record in records {
            let spec = match WorkflowSpec::from_value(&record.config) {
                Ok(spec) => spec,
                Err(err) => {
                    error!(workflow = %record.name, error = %err, "Skipping workflow with bad config");
                    continue;
                }
            };
            if let Err(reason) = spec.validate() {
                warn!(workflow = %record.name, reason = %reason, "Skipping invalid workflow");
                continue;
            }
            let engine = WorkflowEngine::new(
                spec.clone(),
                record.name.clone(),
                Some(record.id),
                Arc::clone(&self.registry),
                Arc::clone(&self.services),
            );
            cached.push(Arc::new(CachedWorkflow {
                id: record.id,
                name: record.name,
                priority: record.priority,
                trigger_type: spec.trigger_type,
                spec,
                engine,
            }));
        }

        let count = cached.len();
        *self.snapshot.write() = Arc::new(cached);
        info!(count, "Workflow cache reloaded");
        Ok(count)
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Arc<CachedWorkflow>>> {
        Arc::clone(&self.snapshot.read())
    }

    /// Clears the cache.
    pub fn clear(&self) {
        *self.snapshot.write() = Arc::new(Vec::new());
    }

    /// Looks up one workflow by id.
    pub fn by_id(&self, workflow_id: i64) -> Option<Arc<CachedWorkflow>> {
        self.snapshot()
            .iter()
            .find(|w| w.id == workflow_id)
            .cloned()
    }

    /// Selects the workflows that apply to an event.
    ///
    /// Filters: trigger type match; `event_filter` containment when the
    /// event carries a sub-name; owner subscription when the owner is known;
    /// protocol allowlist when one is declared. This is exactly the dispatch
    /// invariant the engine relies on.
    pub async fn get_by_trigger(
        &self,
        trigger: TriggerType,
        protocol: Option<&str>,
        owner_id: Option<i64>,
        sub_name: &str,
    ) -> Vec<Arc<CachedWorkflow>> {
        let subscribed: Option<Vec<i64>> = match owner_id {
            Some(user_id) => match self.store.subscriptions_for_user(user_id).await {
                Ok(subs) => Some(subs.into_iter().map(|s| s.workflow_id).collect()),
                Err(err) => {
                    error!(error = %err, "Failed to load subscriptions, dispatching nothing");
                    Some(Vec::new())
                }
            },
            None => None,
        };

        self.snapshot()
            .iter()
            .filter(|workflow| {
                if workflow.trigger_type != trigger {
                    return false;
                }
                if !sub_name.is_empty() && !workflow.spec.allows_event(sub_name) {
                    return false;
                }
                if let Some(subscribed) = &subscribed
                    && !subscribed.contains(&workflow.id)
                {
                    return false;
                }
                if let Some(protocol) = protocol
                    && !workflow.spec.allows_protocol(protocol)
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Cache statistics for the admin surface.
    pub fn stats(&self) -> Vec<(i64, String, i32)> {
        self.snapshot()
            .iter()
            .map(|w| (w.id, w.name.clone(), w.priority))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use trellis_core::{MemoryStore, UserWorkflowRecord, WorkflowRecord};

    use super::*;

    fn workflow_record(id: i64, priority: i32, config: serde_json::Value) -> WorkflowRecord {
        WorkflowRecord {
            id,
            name: format!("wf{id}"),
            enabled: true,
            priority,
            config,
            creator_id: 1,
        }
    }

    fn basic_config(trigger: &str) -> serde_json::Value {
        json!({
            "trigger_type": trigger,
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "end"}
            ]
        })
    }

    async fn cache_with(records: Vec<WorkflowRecord>, subs: Vec<UserWorkflowRecord>) -> WorkflowCache {
        let store = Arc::new(MemoryStore::new());
        for record in records {
            store.put_workflow(record);
        }
        for sub in subs {
            store.put_subscription(sub);
        }
        let cache = WorkflowCache::new(
            store,
            Arc::new(NodeRegistry::with_builtins()),
            Arc::new(EngineServices::in_memory()),
        );
        cache.reload().await.unwrap();
        cache
    }

    #[tokio::test]
    async fn test_reload_orders_by_priority_and_skips_invalid() {
        let cache = cache_with(
            vec![
                workflow_record(1, 20, basic_config("message")),
                workflow_record(2, 10, basic_config("message")),
                // No start step: skipped at precompile.
                workflow_record(3, 1, json!({"workflow": [{"id": "x", "type": "end"}]})),
            ],
            vec![],
        )
        .await;

        let snapshot = cache.snapshot();
        let ids: Vec<i64> = snapshot.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_trigger_and_protocol_filter() {
        let mut message_config = basic_config("message");
        message_config["protocols"] = json!(["qq"]);
        let cache = cache_with(
            vec![
                workflow_record(1, 1, message_config),
                workflow_record(2, 2, basic_config("notice")),
            ],
            vec![],
        )
        .await;

        let qq = cache
            .get_by_trigger(TriggerType::Message, Some("qq"), None, "")
            .await;
        assert_eq!(qq.len(), 1);
        assert_eq!(qq[0].id, 1);

        let onebot = cache
            .get_by_trigger(TriggerType::Message, Some("onebot"), None, "")
            .await;
        assert!(onebot.is_empty());

        let notices = cache
            .get_by_trigger(TriggerType::Notice, Some("onebot"), None, "")
            .await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].id, 2);
    }

    #[tokio::test]
    async fn test_event_filter_containment() {
        let mut config = basic_config("notice");
        config["event_filter"] = json!(["group_increase"]);
        let cache = cache_with(vec![workflow_record(1, 1, config)], vec![]).await;

        let hit = cache
            .get_by_trigger(TriggerType::Notice, None, None, "group_increase")
            .await;
        assert_eq!(hit.len(), 1);

        let miss = cache
            .get_by_trigger(TriggerType::Notice, None, None, "group_decrease")
            .await;
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_filter() {
        let cache = cache_with(
            vec![
                workflow_record(1, 1, basic_config("message")),
                workflow_record(2, 2, basic_config("message")),
            ],
            vec![UserWorkflowRecord {
                user_id: 10,
                workflow_id: 2,
                enabled: true,
            }],
        )
        .await;

        let for_owner = cache
            .get_by_trigger(TriggerType::Message, None, Some(10), "")
            .await;
        assert_eq!(for_owner.len(), 1);
        assert_eq!(for_owner[0].id, 2);

        // Unknown owner: subscription set is required once an owner is given.
        let unsubscribed = cache
            .get_by_trigger(TriggerType::Message, None, Some(999), "")
            .await;
        assert!(unsubscribed.is_empty());

        // Ownerless lookups skip the subscription filter entirely.
        let ownerless = cache
            .get_by_trigger(TriggerType::Message, None, None, "")
            .await;
        assert_eq!(ownerless.len(), 2);
    }
}
