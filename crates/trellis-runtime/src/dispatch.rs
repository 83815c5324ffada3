//! Dispatch core: event → workflow selection → concurrent execution.
//!
//! For each inbound event the dispatcher asks the workflow cache for the
//! applicable subset, spawns one task per workflow, and drains completions
//! in arrival order. Every handled result whose response is a message is
//! sent back through the originating bot; the remainder keeps draining —
//! there is no cancellation and no mutual exclusion between workflows.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, error, info, warn};

use trellis_core::{Bot, BoxedEvent, Event, EventHandler, EventKind, RecordStore, TriggerType};
use trellis_engine::WorkflowCache;

/// Outbound send budget per response.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Routes events into concurrent workflow executions.
pub struct Dispatcher {
    cache: Arc<WorkflowCache>,
    store: Arc<dyn RecordStore>,
}

impl Dispatcher {
    /// Creates a dispatcher over the cache and record store.
    pub fn new(cache: Arc<WorkflowCache>, store: Arc<dyn RecordStore>) -> Arc<Self> {
        Arc::new(Self { cache, store })
    }

    /// Builds the [`EventHandler`] closure adapters invoke per event.
    pub fn handler(self: Arc<Self>) -> EventHandler {
        Arc::new(move |event| {
            let dispatcher = Arc::clone(&self);
            Box::pin(async move {
                dispatcher.dispatch(event).await;
            })
        })
    }

    /// Dispatches one event. Returns the number of workflows that handled
    /// it.
    pub async fn dispatch(&self, event: BoxedEvent) -> usize {
        // Heartbeats and lifecycle chatter never reach workflows.
        if event.kind() == EventKind::Meta {
            return 0;
        }
        let Some(trigger) = TriggerType::for_event(event.kind()) else {
            return 0;
        };

        // The owner scopes the subscription filter; resolution failure
        // degrades to an ownerless lookup rather than dropping the event.
        let owner_id = match event.bot() {
            Some(bot) => match self.store.bot(bot.bot_id()).await {
                Ok(record) => record.map(|r| r.owner_id),
                Err(err) => {
                    warn!(error = %err, "Owner lookup failed");
                    None
                }
            },
            None => None,
        };

        let sub_name = event.sub_name().unwrap_or_default().to_string();
        let workflows = self
            .cache
            .get_by_trigger(trigger, Some(event.protocol()), owner_id, &sub_name)
            .await;

        if workflows.is_empty() {
            return 0;
        }

        debug!(
            event = %event.event_name(),
            count = workflows.len(),
            "Dispatching event to workflows"
        );

        // All matching workflows fire in parallel, every time. Priority
        // orders the enumeration only.
        let mut tasks = FuturesUnordered::new();
        for workflow in workflows {
            let event = event.clone();
            tasks.push(tokio::spawn(async move {
                let outcome = workflow.engine.execute(event).await;
                (workflow, outcome)
            }));
        }

        let mut handled = 0usize;
        while let Some(joined) = tasks.next().await {
            let (workflow, outcome) = match joined {
                Ok(result) => result,
                Err(err) => {
                    error!(error = %err, "Workflow task panicked");
                    continue;
                }
            };

            if !outcome.handled {
                continue;
            }
            handled += 1;

            let Some(response) = outcome.response else {
                continue;
            };
            let Some(bot) = event.bot() else {
                warn!(workflow = %workflow.name, "Bot gone before response send");
                continue;
            };

            match tokio::time::timeout(
                SEND_TIMEOUT,
                bot.send(event.inner().as_ref(), &response),
            )
            .await
            {
                Ok(Ok(_)) => {
                    info!(workflow = %workflow.name, "Response sent");
                }
                Ok(Err(err)) => {
                    error!(workflow = %workflow.name, error = %err, "Response send failed");
                }
                Err(_) => {
                    error!(workflow = %workflow.name, "Response send timed out");
                }
            }
        }

        handled
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use trellis_core::{
        ApiResult, Bot, BotRecord, Event, MemoryStore, Message, MessageEvent, MessageScene,
        MetaEvent, NoticeEvent, Segment, Sender, UserWorkflowRecord, WorkflowRecord,
    };
    use trellis_engine::{EngineServices, NodeRegistry};

    use super::*;

    struct RecordingBot {
        bot_id: i64,
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Bot for RecordingBot {
        fn bot_id(&self) -> i64 {
            self.bot_id
        }

        fn self_id(&self) -> &str {
            "10000"
        }

        fn protocol(&self) -> &'static str {
            "onebot"
        }

        async fn send(&self, _event: &dyn Event, _message: &Message) -> ApiResult<Value> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }

        async fn call_api(&self, _action: &str, _params: Value) -> ApiResult<Value> {
            Ok(Value::Null)
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn reply_workflow(id: i64, priority: i32, needle: &str, reply: &str) -> WorkflowRecord {
        WorkflowRecord {
            id,
            name: format!("wf{id}"),
            enabled: true,
            priority,
            config: json!({
                "trigger_type": "message",
                "workflow": [
                    {"id": "s1", "type": "start"},
                    {"id": "s2", "type": "condition", "config": {
                        "variable_name": "message",
                        "condition_type": "contains",
                        "compare_value": needle,
                        "true_branch": "reply"
                    }},
                    {"id": "reply", "type": "send_message", "config": {"content": reply}},
                    {"id": "s4", "type": "end"}
                ]
            }),
            creator_id: 1,
        }
    }

    async fn setup(
        workflows: Vec<WorkflowRecord>,
        subscriptions: Vec<UserWorkflowRecord>,
    ) -> (Arc<Dispatcher>, Arc<AtomicUsize>, Arc<dyn Bot>) {
        let store = Arc::new(MemoryStore::new());
        store.put_bot(BotRecord {
            id: 1,
            name: "bot".into(),
            protocol: "onebot".into(),
            config: json!({}),
            owner_id: 10,
            enabled: true,
        });
        for workflow in workflows {
            store.put_workflow(workflow);
        }
        for sub in subscriptions {
            store.put_subscription(sub);
        }

        let cache = Arc::new(WorkflowCache::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::new(NodeRegistry::with_builtins()),
            Arc::new(EngineServices::in_memory()),
        ));
        cache.reload().await.unwrap();

        let sent = Arc::new(AtomicUsize::new(0));
        let bot: Arc<dyn Bot> = Arc::new(RecordingBot {
            bot_id: 1,
            sent: Arc::clone(&sent),
        });

        let dispatcher = Dispatcher::new(cache, store);
        (dispatcher, sent, bot)
    }

    fn message_event(text: &str, bot: &Arc<dyn Bot>) -> BoxedEvent {
        BoxedEvent::new(MessageEvent {
            protocol: "onebot",
            self_id: "10000".into(),
            time: 0,
            scene: MessageScene::Group,
            message_id: "m1".into(),
            sender: Sender {
                user_id: "42".into(),
                nickname: None,
                role: None,
            },
            group_id: Some("777".into()),
            channel_id: None,
            guild_id: None,
            message: Message::from_segments(vec![Segment::text(text)]),
            to_me: true,
            raw: Value::Null,
        })
        .with_bot(bot)
    }

    #[tokio::test]
    async fn test_matching_workflow_replies() {
        let subs = vec![UserWorkflowRecord {
            user_id: 10,
            workflow_id: 1,
            enabled: true,
        }];
        let (dispatcher, sent, bot) = setup(vec![reply_workflow(1, 1, "ping", "pong")], subs).await;

        let handled = dispatcher.dispatch(message_event("ping now", &bot)).await;
        assert_eq!(handled, 1);
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        // Non-matching content: selection happens, the condition aborts.
        let handled = dispatcher.dispatch(message_event("hello", &bot)).await;
        assert_eq!(handled, 0);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_workflow_not_dispatched() {
        // Workflow 2 exists but the bot owner has no subscription for it.
        let subs = vec![UserWorkflowRecord {
            user_id: 10,
            workflow_id: 1,
            enabled: true,
        }];
        let (dispatcher, sent, bot) = setup(
            vec![
                reply_workflow(1, 1, "ping", "pong"),
                reply_workflow(2, 2, "ping", "other"),
            ],
            subs,
        )
        .await;

        let handled = dispatcher.dispatch(message_event("ping", &bot)).await;
        assert_eq!(handled, 1);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_matching_workflows_run() {
        let subs = vec![
            UserWorkflowRecord { user_id: 10, workflow_id: 1, enabled: true },
            UserWorkflowRecord { user_id: 10, workflow_id: 2, enabled: true },
        ];
        let (dispatcher, sent, bot) = setup(
            vec![
                reply_workflow(1, 1, "ping", "pong"),
                reply_workflow(2, 2, "ping", "pong2"),
            ],
            subs,
        )
        .await;

        // Both fire; every handled response is sent, none cancelled.
        let handled = dispatcher.dispatch(message_event("ping", &bot)).await;
        assert_eq!(handled, 2);
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_meta_events_skipped() {
        let subs = vec![UserWorkflowRecord {
            user_id: 10,
            workflow_id: 1,
            enabled: true,
        }];
        let (dispatcher, _, bot) = setup(vec![reply_workflow(1, 1, "ping", "pong")], subs).await;

        let meta = BoxedEvent::new(MetaEvent {
            protocol: "onebot",
            self_id: "1".into(),
            time: 0,
            meta_type: "heartbeat".into(),
            raw: Value::Null,
        })
        .with_bot(&bot);
        assert_eq!(dispatcher.dispatch(meta).await, 0);
    }

    #[tokio::test]
    async fn test_empty_selection_is_silent() {
        let (dispatcher, sent, bot) = setup(vec![], vec![]).await;
        let handled = dispatcher.dispatch(message_event("ping", &bot)).await;
        assert_eq!(handled, 0);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notice_event_filter_routing() {
        let store = Arc::new(MemoryStore::new());
        store.put_bot(BotRecord {
            id: 1,
            name: "bot".into(),
            protocol: "onebot".into(),
            config: json!({}),
            owner_id: 10,
            enabled: true,
        });
        store.put_workflow(WorkflowRecord {
            id: 1,
            name: "welcome".into(),
            enabled: true,
            priority: 1,
            config: json!({
                "trigger_type": "notice",
                "event_filter": ["group_increase"],
                "workflow": [
                    {"id": "s1", "type": "start"},
                    {"id": "s2", "type": "end"}
                ]
            }),
            creator_id: 1,
        });
        store.put_subscription(UserWorkflowRecord {
            user_id: 10,
            workflow_id: 1,
            enabled: true,
        });

        let cache = Arc::new(WorkflowCache::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::new(NodeRegistry::with_builtins()),
            Arc::new(EngineServices::in_memory()),
        ));
        cache.reload().await.unwrap();
        let dispatcher = Dispatcher::new(Arc::clone(&cache), store);

        let selected = cache
            .get_by_trigger(TriggerType::Notice, Some("onebot"), Some(10), "group_increase")
            .await;
        assert_eq!(selected.len(), 1);

        let notice = BoxedEvent::new(NoticeEvent {
            protocol: "onebot",
            self_id: "1".into(),
            time: 0,
            notice_type: "group_decrease".into(),
            user_id: None,
            group_id: Some("7".into()),
            raw: Value::Null,
        });
        // Filtered sub-kind: nothing runs, so nothing handles it.
        assert_eq!(dispatcher.dispatch(notice).await, 0);
    }
}
