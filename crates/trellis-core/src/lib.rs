//! # Trellis Core
//!
//! The core contracts of the Trellis bot orchestration platform.
//!
//! This crate defines everything the protocol adapters, the workflow engine,
//! and the runtime agree on:
//!
//! - **Event model**: protocol-neutral events with deterministic session ids
//!   ([`Event`], [`BoxedEvent`], [`MessageEvent`], [`ScheduledEvent`], ...)
//! - **Message model**: segment sequences with a CQ-code wire form
//!   ([`Message`], [`Segment`])
//! - **Adapter contract**: lifecycle, parsing, API surface ([`Adapter`],
//!   [`Bot`], [`AdapterManager`])
//! - **Store abstractions**: the record store and TTL key-value store the
//!   core consumes from its collaborators ([`RecordStore`], [`KvStore`])
//! - **Workflow configuration**: the typed view of stored workflow blobs
//!   ([`WorkflowSpec`])
//!
//! ## Data flow
//!
//! ```text
//! wire bytes ─▶ Adapter::parse_event ─▶ BoxedEvent ─▶ dispatch ─▶ engines
//!                                                        │
//! wire bytes ◀─ Bot::send ◀─ Message (response) ◀────────┘
//! ```

pub mod adapter;
pub mod bot;
pub mod error;
pub mod event;
pub mod kv;
pub mod manager;
pub mod message;
pub mod store;
pub mod workflow;

pub use adapter::{Adapter, AdapterState, AdapterStatus, EventHandler, START_BUDGET_SECS};
pub use bot::Bot;
pub use error::{
    AdapterError, AdapterResult, ApiError, ApiResult, StoreError, StoreResult, TransportError,
    TransportResult,
};
pub use event::{
    BoxedEvent, Event, EventKind, MessageEvent, MessageScene, MetaEvent, NoticeEvent,
    RequestEvent, ScheduledEvent, Sender,
};
pub use kv::{KvStore, MemoryKv};
pub use manager::{AdapterCtor, AdapterManager};
pub use message::{parse_cq_string, Message, Segment};
pub use store::{
    BotRecord, GlobalVariableRecord, MemoryStore, RecordStore, UserWorkflowRecord, WorkflowRecord,
};
pub use workflow::{ScheduleSpec, StepSpec, TriggerType, WorkflowSpec};
