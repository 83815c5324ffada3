//! Echo-based request/response correlation over the shared socket.
//!
//! Every API call is tagged with a unique `echo` id (a v4 UUID) before it is
//! written to the socket; the matching response arrives interleaved with
//! events on the same connection and is routed back to the waiting future.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use trellis_core::{ApiError, ApiResult, TransportError};

/// How long a call waits for its correlated response.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Correlates `{action, params, echo}` requests with their responses.
///
/// Each call:
/// 1. takes a fresh echo id;
/// 2. registers a one-shot channel under that id;
/// 3. writes the request to the socket through the write channel;
/// 4. awaits the one-shot with a [`CALL_TIMEOUT`] budget.
///
/// On timeout the pending slot is purged, so a late response for that echo
/// is discarded by [`WsCaller::on_incoming_response`].
pub struct WsCaller {
    /// Socket write channel: serialized JSON frames for the run loop.
    message_tx: mpsc::Sender<Vec<u8>>,
    /// Pending call map: echo id → response channel.
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl WsCaller {
    /// Creates a caller over the socket write channel.
    pub fn new(message_tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            message_tx,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Makes an API call and awaits the correlated response frame.
    pub async fn call(&self, action: &str, params: Value) -> ApiResult<Value> {
        let echo = Uuid::new_v4().to_string();

        // Register before sending so a fast response can never be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(echo.clone(), tx);

        let request = json!({
            "action": action,
            "params": params,
            "echo": echo,
        });

        debug!(action = %action, echo = %echo, "Calling OneBot API");

        let request_bytes = serde_json::to_vec(&request)?;
        if let Err(err) = self.message_tx.send(request_bytes).await {
            self.pending.lock().remove(&echo);
            return Err(TransportError::SendFailed(err.to_string()).into());
        }

        match timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Channel closed: the transport was torn down under us.
            Ok(Err(_)) => Err(ApiError::NotConnected),
            Err(_) => {
                self.pending.lock().remove(&echo);
                Err(ApiError::Timeout)
            }
        }
    }

    /// Routes an incoming frame that carries an `echo`. Returns true when a
    /// waiter consumed it.
    pub fn on_incoming_response(&self, data: &Value) -> bool {
        let Some(echo) = data.get("echo").and_then(Value::as_str) else {
            return false;
        };
        let mut pending = self.pending.lock();
        if let Some(tx) = pending.remove(echo) {
            let _ = tx.send(data.clone());
            true
        } else {
            // Late arrival after a timeout purge: discard.
            warn!(echo = %echo, "Response for unknown echo discarded");
            false
        }
    }

    /// Unblocks every pending call with `NotConnected` when the socket dies.
    pub fn on_disconnect(&self) {
        let mut pending = self.pending.lock();
        let count = pending.len();
        if count > 0 {
            debug!(count, "Clearing pending calls on disconnect");
            pending.clear();
        }
    }

    /// Number of in-flight calls.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_correlation_and_late_response() {
        let (tx, mut rx) = mpsc::channel(16);
        let caller = std::sync::Arc::new(WsCaller::new(tx));

        let caller_for_call = std::sync::Arc::clone(&caller);
        let call =
            tokio::spawn(async move { caller_for_call.call("get_status", json!({})).await });

        let frame = rx.recv().await.unwrap();
        let request: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(request["action"], "get_status");
        let echo = request["echo"].as_str().unwrap().to_string();

        let response = json!({"status": "ok", "retcode": 0, "data": {"good": true}, "echo": echo});
        assert!(caller.on_incoming_response(&response));

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["data"]["good"], true);

        // The slot is gone: replaying the same echo finds no waiter.
        assert!(!caller.on_incoming_response(&response));
        assert_eq!(caller.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_purges_slot() {
        let (tx, mut rx) = mpsc::channel(16);
        let caller = std::sync::Arc::new(WsCaller::new(tx));

        let caller_for_call = std::sync::Arc::clone(&caller);
        let call = tokio::spawn(async move { caller_for_call.call("send_msg", json!({})).await });

        let frame = rx.recv().await.unwrap();
        let request: Value = serde_json::from_slice(&frame).unwrap();
        let echo = request["echo"].as_str().unwrap().to_string();

        // No response arrives within the budget.
        tokio::time::advance(CALL_TIMEOUT + Duration::from_millis(10)).await;
        let result = call.await.unwrap();
        assert!(matches!(result, Err(ApiError::Timeout)));

        // A subsequent late frame for that echo is ignored.
        assert!(!caller.on_incoming_response(&json!({"status": "ok", "echo": echo})));
    }

    #[tokio::test]
    async fn test_disconnect_unblocks_callers() {
        let (tx, mut rx) = mpsc::channel(16);
        let caller = std::sync::Arc::new(WsCaller::new(tx));

        let caller_for_call = std::sync::Arc::clone(&caller);
        let call = tokio::spawn(async move { caller_for_call.call("send_msg", json!({})).await });

        let _ = rx.recv().await.unwrap();
        caller.on_disconnect();

        let result = call.await.unwrap();
        assert!(matches!(result, Err(ApiError::NotConnected)));
    }
}
