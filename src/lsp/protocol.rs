//! JSON-RPC 2.0 protocol layer
//!
//! Implements the server side of a JSON-RPC 2.0 peer: inbound requests and
//! notifications are handed to the dispatch loop in arrival order, while
//! responses to server-initiated requests are matched to their waiters on
//! the I/O task so they never depend on the dispatch loop making progress.

use crate::lsp::framing::{FramingError, LspFraming};
use crate::lsp::jsonrpc_utils::{JSONRPC_VERSION, error_codes, error_response};
use crate::io::transport::Transport;
use crate::log_lsp_message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{Level, debug, error, trace, warn};

// ============================================================================
// JSON-RPC Types
// ============================================================================

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (number or string)
    pub id: Value,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    /// Request identifier (matches the request)
    pub id: Value,

    /// Result (present if successful). A `null` result deserializes to None.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any message that can arrive on the wire
#[derive(Debug, Clone)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl Message {
    /// Classify a raw message body by the presence of `method` and `id`
    pub fn parse(raw: &str) -> Result<Self, JsonRpcError> {
        let value: Value = serde_json::from_str(raw).map_err(JsonRpcError::Deserialization)?;

        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some_and(|id| !id.is_null());

        let message = if has_method && has_id {
            Message::Request(serde_json::from_value(value).map_err(JsonRpcError::Deserialization)?)
        } else if has_method {
            Message::Notification(
                serde_json::from_value(value).map_err(JsonRpcError::Deserialization)?,
            )
        } else if value.get("id").is_some() {
            // Responses may carry a null id when the peer could not read ours
            Message::Response(serde_json::from_value(value).map_err(JsonRpcError::Deserialization)?)
        } else {
            return Err(JsonRpcError::InvalidMessage(
                "message has neither method nor id".to_string(),
            ));
        };

        Ok(message)
    }
}

/// Messages the dispatch loop has to act on
#[derive(Debug, Clone)]
pub enum Incoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

// ============================================================================
// JSON-RPC Errors
// ============================================================================

/// JSON-RPC error type
#[derive(Debug, thiserror::Error)]
pub enum JsonRpcError {
    #[error("JSON-RPC invalid message: {0}")]
    InvalidMessage(String),

    #[error("JSON-RPC peer error ({code}): {message}")]
    Server { code: i32, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(serde_json::Error),

    #[error("Request timeout")]
    Timeout,

    #[error("Request was cancelled")]
    RequestCancelled,
}

// ============================================================================
// JSON-RPC Connection
// ============================================================================

type PendingRequests = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// Server-side JSON-RPC connection to the editor
///
/// Cheap to clone; every clone shares the same outbound queue and pending
/// request table.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending outbound messages (responses, requests, notifications)
    outbound_sender: mpsc::UnboundedSender<String>,

    /// Id counter for server-initiated requests
    request_id: Arc<AtomicI64>,

    /// Server-initiated requests waiting for the client's response
    pending_requests: PendingRequests,

    /// How long to wait for the client to answer
    request_timeout: Duration,
}

impl Connection {
    /// Start the I/O task over `transport`.
    ///
    /// Returns the connection and the stream of inbound requests and
    /// notifications. The stream ends when the transport closes.
    pub fn new<T: Transport + 'static>(
        transport: T,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Incoming>) {
        let framed = Arc::new(Mutex::new(LspFraming::new(transport)));
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel::<String>();
        let (incoming_sender, incoming_receiver) = mpsc::unbounded_channel::<Incoming>();
        let pending_requests: PendingRequests = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(Self::io_task(
            framed,
            outbound_receiver,
            incoming_sender,
            Arc::clone(&pending_requests),
        ));

        let connection = Self {
            outbound_sender,
            request_id: Arc::new(AtomicI64::new(1)),
            pending_requests,
            request_timeout,
        };

        (connection, incoming_receiver)
    }

    async fn io_task<T: Transport + 'static>(
        framed: Arc<Mutex<LspFraming<T>>>,
        mut outbound_receiver: mpsc::UnboundedReceiver<String>,
        incoming_sender: mpsc::UnboundedSender<Incoming>,
        pending_requests: PendingRequests,
    ) {
        loop {
            tokio::select! {
                biased;

                // Outbound messages (prioritized)
                Some(message) = outbound_receiver.recv() => {
                    let mut transport = framed.lock().await;
                    if let Err(e) = transport.send(&message).await {
                        error!("Failed to send message: {}", e);
                        break;
                    }
                }
                result = async {
                    let mut transport = framed.lock().await;
                    transport.receive().await
                } => {
                    match result {
                        Ok(raw) => {
                            if let Some(reply) = Self::process_inbound_message(
                                &raw,
                                &incoming_sender,
                                &pending_requests,
                            )
                            .await
                            {
                                let mut transport = framed.lock().await;
                                if let Err(e) = transport.send(&reply).await {
                                    error!("Failed to send error reply: {}", e);
                                    break;
                                }
                            }
                        }
                        Err(FramingError::Transport(e)) => {
                            debug!("Inbound stream ended: {}", e);
                            break;
                        }
                        // Framing cannot resynchronize after a bad header
                        Err(e) => {
                            warn!("Closing connection on unreadable input: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        // Flush whatever was queued before the stream ended
        let mut transport = framed.lock().await;
        while let Ok(message) = outbound_receiver.try_recv() {
            if transport.send(&message).await.is_err() {
                break;
            }
        }

        trace!(
            "Closing transport (inbound connected: {})",
            transport.is_connected()
        );
        if let Err(e) = transport.close().await {
            debug!("Failed to close transport: {}", e);
        }
        drop(transport);

        // Dropping the senders wakes every waiter with RequestCancelled
        let abandoned = pending_requests.lock().await.drain().count();
        if abandoned > 0 {
            warn!("Abandoned {} pending client requests", abandoned);
        }

        trace!("Connection I/O task finished");
    }

    /// Route one inbound message. Returns an error reply to send back when
    /// the message could not be understood.
    async fn process_inbound_message(
        raw: &str,
        incoming_sender: &mpsc::UnboundedSender<Incoming>,
        pending_requests: &PendingRequests,
    ) -> Option<String> {
        trace!("Connection: Received message: {}", raw);

        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparseable message: {}", e);
                let reply = error_response(Value::Null, error_codes::PARSE_ERROR, e.to_string());
                return serde_json::to_string(&reply).ok();
            }
        };

        match message {
            Message::Response(response) => {
                let Some(id) = response.id.as_i64() else {
                    debug!("Received response with non-numeric id: {}", response.id);
                    return None;
                };
                let waiter = pending_requests.lock().await.remove(&id);
                match waiter {
                    Some(sender) => {
                        if sender.send(response).is_err() {
                            debug!("Response receiver dropped for request {}", id);
                        }
                    }
                    None => debug!("Received response for unknown request {}", id),
                }
            }
            Message::Request(request) => {
                log_lsp_message!(
                    Level::DEBUG,
                    "incoming",
                    request.method.as_str(),
                    &request.params
                );
                if incoming_sender.send(Incoming::Request(request)).is_err() {
                    debug!("Dispatch loop gone, dropping request");
                }
            }
            Message::Notification(notification) => {
                log_lsp_message!(
                    Level::DEBUG,
                    "incoming",
                    notification.method.as_str(),
                    &notification.params
                );
                if incoming_sender
                    .send(Incoming::Notification(notification))
                    .is_err()
                {
                    debug!("Dispatch loop gone, dropping notification");
                }
            }
        }

        None
    }

    fn enqueue<M: Serialize>(&self, message: &M) -> Result<(), JsonRpcError> {
        let json = serde_json::to_string(message).map_err(JsonRpcError::Serialization)?;
        self.outbound_sender
            .send(json)
            .map_err(|_| JsonRpcError::Transport("Outbound channel closed".to_string()))
    }

    /// Send the response to a client request
    pub fn respond(&self, response: JsonRpcResponse) -> Result<(), JsonRpcError> {
        trace!("Connection: Responding to request {}", response.id);
        self.enqueue(&response)
    }

    /// Send a notification to the client
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), JsonRpcError> {
        let notification = JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: Some(serde_json::to_value(params).map_err(JsonRpcError::Serialization)?),
        };

        log_lsp_message!(Level::DEBUG, "outgoing", method, &notification.params);
        self.enqueue(&notification)
    }

    /// Send a request to the client and wait for its result
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R, JsonRpcError>
    where
        P: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (response_sender, response_receiver) = oneshot::channel();

        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Value::from(id),
            method: method.to_string(),
            params: Some(serde_json::to_value(params).map_err(JsonRpcError::Serialization)?),
        };

        self.pending_requests
            .lock()
            .await
            .insert(id, response_sender);

        log_lsp_message!(Level::DEBUG, "outgoing", method, &request.params);
        if let Err(e) = self.enqueue(&request) {
            self.pending_requests.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, response_receiver).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(JsonRpcError::RequestCancelled),
            Err(_) => {
                self.pending_requests.lock().await.remove(&id);
                return Err(JsonRpcError::Timeout);
            }
        };

        if let Some(error) = response.error {
            return Err(JsonRpcError::Server {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(JsonRpcError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::StdioTransport;
    use crate::test_utils::frame;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf};

    async fn read_framed(reader: &mut ReadHalf<DuplexStream>) -> Value {
        let mut header = Vec::new();
        while !header.ends_with(b"\r\n\r\n") {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte).await.unwrap();
            header.push(byte[0]);
        }
        let header = String::from_utf8(header).unwrap();
        let length: usize = header
            .trim()
            .strip_prefix("Content-Length:")
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_message_classification() {
        let request = Message::parse(r#"{"jsonrpc":"2.0","id":1,"method":"shutdown"}"#).unwrap();
        assert!(matches!(request, Message::Request(r) if r.method == "shutdown"));

        let notification =
            Message::parse(r#"{"jsonrpc":"2.0","method":"exit"}"#).unwrap();
        assert!(matches!(notification, Message::Notification(n) if n.method == "exit"));

        let response = Message::parse(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert!(matches!(response, Message::Response(r) if r.id == json!(3)));

        assert!(matches!(
            Message::parse(r#"{"jsonrpc":"2.0"}"#),
            Err(JsonRpcError::InvalidMessage(_))
        ));
        assert!(matches!(
            Message::parse("not json"),
            Err(JsonRpcError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_inbound_messages_are_forwarded_in_order() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let (_client_read, mut client_write) = tokio::io::split(client_end);

        let (_connection, mut incoming) = Connection::new(
            StdioTransport::new(server_read, server_write),
            Duration::from_secs(5),
        );

        let first = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        let second = json!({"jsonrpc": "2.0", "method": "initialized", "params": {}});
        client_write
            .write_all(format!("{}{}", frame(&first), frame(&second)).as_bytes())
            .await
            .unwrap();

        match incoming.recv().await.unwrap() {
            Incoming::Request(request) => assert_eq!(request.method, "initialize"),
            other => panic!("Expected request, got {other:?}"),
        }
        match incoming.recv().await.unwrap() {
            Incoming::Notification(notification) => {
                assert_eq!(notification.method, "initialized")
            }
            other => panic!("Expected notification, got {other:?}"),
        }

        drop(client_write);
        drop(_client_read);
        assert!(incoming.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_server_request_is_matched_with_client_response() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let (mut client_read, mut client_write) = tokio::io::split(client_end);

        let (connection, _incoming) = Connection::new(
            StdioTransport::new(server_read, server_write),
            Duration::from_secs(5),
        );

        let pending = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .request::<_, Vec<Value>>(
                        "workspace/configuration",
                        json!({"items": [{"section": "LPythonLanguageServer"}]}),
                    )
                    .await
            }
        });

        let request = read_framed(&mut client_read).await;
        assert_eq!(request["method"], "workspace/configuration");

        let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": [{"maxNumberOfProblems": 3}]});
        client_write.write_all(frame(&reply).as_bytes()).await.unwrap();

        let result = pending.await.unwrap().unwrap();
        assert_eq!(result, vec![json!({"maxNumberOfProblems": 3})]);
    }

    #[tokio::test]
    async fn test_client_error_response_surfaces_as_error() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let (mut client_read, mut client_write) = tokio::io::split(client_end);

        let (connection, _incoming) = Connection::new(
            StdioTransport::new(server_read, server_write),
            Duration::from_secs(5),
        );

        let pending = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .request::<_, Value>("client/registerCapability", json!({"registrations": []}))
                    .await
            }
        });

        let request = read_framed(&mut client_read).await;
        let reply = json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": -32601, "message": "unsupported"}
        });
        client_write.write_all(frame(&reply).as_bytes()).await.unwrap();

        match pending.await.unwrap() {
            Err(JsonRpcError::Server { code, message, .. }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "unsupported");
            }
            other => panic!("Expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let _client = client_end;

        let (connection, _incoming) = Connection::new(
            StdioTransport::new(server_read, server_write),
            Duration::from_millis(50),
        );

        let result = connection
            .request::<_, Value>("workspace/configuration", json!({"items": []}))
            .await;
        assert!(matches!(result, Err(JsonRpcError::Timeout)));
    }

    #[tokio::test]
    async fn test_garbage_gets_parse_error_reply() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let (mut client_read, mut client_write) = tokio::io::split(client_end);

        let (_connection, _incoming) = Connection::new(
            StdioTransport::new(server_read, server_write),
            Duration::from_secs(5),
        );

        client_write
            .write_all(b"Content-Length: 8\r\n\r\nnot json")
            .await
            .unwrap();

        let reply = read_framed(&mut client_read).await;
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], error_codes::PARSE_ERROR);
    }
}
