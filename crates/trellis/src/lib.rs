//! # Trellis
//!
//! A multi-tenant chat-bot orchestration platform. Trellis ingests events
//! from heterogeneous chat protocols, dispatches them through user-defined
//! workflows that evaluate conditions and produce outbound messages, and
//! sends replies back through the originating protocol.
//!
//! ## Architecture
//!
//! ```text
//! wire bytes ─▶ Adapter ─▶ Event ─▶ Dispatch ─▶ { Engine }ₖ ─▶ Response?
//!                  ▲                                              │
//!                  └───────────────── Bot.send ◀──────────────────┘
//! ```
//!
//! - **Adapters** translate between wire payloads and the protocol-neutral
//!   event/message model: a webhook protocol with Ed25519-signed callbacks
//!   ([`trellis_adapter_qq`]) and a persistent-WebSocket protocol
//!   ([`trellis_adapter_onebot`]).
//! - **The engine** interprets workflows: typed node steps with conditional
//!   branching, loops, jumps, templated variables, and per-step debug
//!   records.
//! - **Dispatch** selects the workflow subset per event (trigger kind,
//!   protocol, subscription) and runs all of them concurrently.
//! - **The scheduler** fans cron/interval ticks out to subscribed bots.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::default().load()?;
//!     let runtime = TrellisRuntime::builder(config)
//!         .with_store(store)
//!         .with_kv(kv)
//!         .build();
//!
//!     runtime.register_adapter("qq", QqAdapter::create);
//!     runtime.register_adapter("onebot", OneBotAdapter::create);
//!
//!     let webhook = WebhookState::new(
//!         runtime.manager().clone(),
//!         runtime.store().clone(),
//!         runtime.kv().clone(),
//!     );
//!     runtime.set_webhook_router(trellis_adapter_qq::webhook::router(webhook));
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub use trellis_core::*;

pub use trellis_adapter_onebot;
pub use trellis_adapter_qq;
pub use trellis_engine;
pub use trellis_runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    // Runtime - main entry point
    pub use trellis_runtime::{ConfigLoader, TrellisConfig, TrellisRuntime};

    // Core model
    pub use trellis_core::{
        Adapter, Bot, BoxedEvent, Event, EventKind, Message, Segment, TriggerType, WorkflowSpec,
    };

    // Engine surface for embedders
    pub use trellis_engine::{
        EngineServices, NodeRegistry, Snippet, SnippetRegistry, WorkflowEngine,
    };

    // Adapters
    pub use trellis_adapter_onebot::OneBotAdapter;
    pub use trellis_adapter_qq::{QqAdapter, WebhookState};
}
