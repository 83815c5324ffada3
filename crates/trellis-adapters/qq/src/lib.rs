//! # Trellis QQ Adapter
//!
//! Adapter for the QQ official bot platform: a server-initiated webhook
//! protocol with Ed25519-signed callbacks, OAuth-style token refresh, a
//! multi-endpoint REST API, and event deduplication.
//!
//! ## Inbound
//!
//! The platform POSTs callbacks to the shared [`webhook`] route. The route
//! identifies the bot via `X-Bot-Appid`, verifies the signature, answers the
//! op 13 handshake, deduplicates by event id, and hands parsed events to the
//! adapter's handler.
//!
//! ## Outbound
//!
//! [`QqBot::send`] resolves the target from the triggering event's scene,
//! uploads media for a `file_info` handle where the platform requires the
//! two-step send, and attaches a per-`msg_id` `msg_seq` so replies never
//! collide.
//!
//! ## Wiring
//!
//! ```rust,ignore
//! manager.register("qq", trellis_adapter_qq::QqAdapter::create);
//! let state = WebhookState::new(manager, store, kv);
//! let app = trellis_adapter_qq::webhook::router(state);
//! ```

pub mod adapter;
pub mod bot;
pub mod client;
pub mod config;
pub mod events;
pub mod seq;
pub mod sign;
pub mod webhook;

pub use adapter::QqAdapter;
pub use bot::QqBot;
pub use client::{MediaKind, MediaSource, QqApiClient, SendTarget};
pub use config::QqConfig;
pub use events::{Envelope, OP_DISPATCH, OP_HANDSHAKE};
pub use webhook::{WebhookState, WEBHOOK_PATH};
