//! # Trellis OneBot Adapter
//!
//! Adapter for OneBot v11 over a client-initiated persistent WebSocket:
//! connection lifecycle with automatic reconnect, request/response
//! correlation over the shared socket, and event demultiplexing.
//!
//! ## Demultiplexing
//!
//! Every inbound frame is JSON. Frames carrying `status`/`retcode` plus an
//! `echo` are API responses and resolve the matching pending call; anything
//! else is an event keyed by `post_type`. The bot's own outgoing echo
//! (`message_sent`) is filtered unless `self_trigger` is configured.
//!
//! ## Wiring
//!
//! ```rust,ignore
//! manager.register("onebot", trellis_adapter_onebot::OneBotAdapter::create);
//! ```

pub mod adapter;
pub mod bot;
pub mod caller;
pub mod config;
pub mod events;

pub use adapter::OneBotAdapter;
pub use bot::OneBotBot;
pub use caller::{WsCaller, CALL_TIMEOUT};
pub use config::OneBotConfig;
