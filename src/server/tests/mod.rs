//! End-to-end tests for the language server
//!
//! Each test drives a real server over an in-memory pipe, speaking framed
//! JSON-RPC the way an editor does. The compiler is a [`MockCompiler`].


use crate::config::ServerConfig;
use crate::io::process::MockCompiler;
use crate::io::transport::StdioTransport;
use crate::server::{ExitStatus, serve};
use crate::test_utils::frame;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

/// Client capabilities with the two flags the server looks at
pub fn capabilities(related_information: bool, configuration: bool) -> Value {
    json!({
        "workspace": {"configuration": configuration},
        "textDocument": {"publishDiagnostics": {"relatedInformation": related_information}}
    })
}

/// Editor side of a running server
pub struct TestEditor {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    server: JoinHandle<ExitStatus>,
    /// Messages read while waiting for something else
    backlog: VecDeque<Value>,
    next_id: i64,
}

impl TestEditor {
    pub fn start(compiler: Arc<MockCompiler>) -> Self {
        let (editor_end, server_end) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_end);
        let (reader, writer) = tokio::io::split(editor_end);

        let config = ServerConfig::builder()
            .compiler_path("lpython")
            .build()
            .unwrap();
        let server = tokio::spawn(serve(
            StdioTransport::new(server_read, server_write),
            config,
            compiler,
        ));

        Self {
            reader,
            writer,
            server,
            backlog: VecDeque::new(),
            next_id: 1,
        }
    }

    pub async fn send(&mut self, message: Value) {
        self.writer
            .write_all(frame(&message).as_bytes())
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    pub async fn send_request(&mut self, method: &str, params: Value) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        id
    }

    /// Send a request and wait for its response
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.send_request(method, params).await;
        self.response(&json!(id)).await
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    /// Answer a request the server sent
    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
            .await;
    }

    /// `initialize` followed by `initialized`; returns the initialize result
    pub async fn initialize(&mut self, capabilities: Value) -> Value {
        let response = self
            .request(
                "initialize",
                json!({
                    "processId": null,
                    "rootUri": null,
                    "capabilities": capabilities,
                    "clientInfo": {"name": "test-editor", "version": "1.0"}
                }),
            )
            .await;
        self.notify("initialized", json!({})).await;
        response["result"].clone()
    }

    pub async fn open(&mut self, uri: &str, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": uri, "languageId": "python", "version": 1, "text": text}}),
        )
        .await;
    }

    pub async fn change(&mut self, uri: &str, version: i32, text: &str) {
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{"text": text}]
            }),
        )
        .await;
    }

    async fn read_message(&mut self) -> Value {
        let mut header = Vec::new();
        while !header.ends_with(b"\r\n\r\n") {
            let mut byte = [0u8; 1];
            self.reader.read_exact(&mut byte).await.unwrap();
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
        self.reader.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Response to the request with `id`
    pub async fn response(&mut self, id: &Value) -> Value {
        let is_response =
            |message: &Value| message.get("method").is_none() && message.get("id") == Some(id);
        self.next_matching(is_response).await
    }

    /// Next notification or request from the server with `method`
    pub async fn server_message(&mut self, method: &str) -> Value {
        self.next_matching(|message| message["method"] == method)
            .await
    }

    async fn next_matching(&mut self, matches: impl Fn(&Value) -> bool) -> Value {
        if let Some(position) = self.backlog.iter().position(&matches) {
            return self.backlog.remove(position).unwrap();
        }
        loop {
            let message = self.read_message().await;
            if matches(&message) {
                return message;
            }
            self.backlog.push_back(message);
        }
    }

    /// Methods of everything read but not consumed so far
    pub fn backlog_methods(&self) -> Vec<String> {
        self.backlog
            .iter()
            .filter_map(|message| message["method"].as_str().map(str::to_string))
            .collect()
    }

    pub async fn exit(mut self) -> ExitStatus {
        self.notify("exit", Value::Null).await;
        self.server.await.unwrap()
    }

    /// Wait for the server to stop on its own
    pub async fn finished(self) -> ExitStatus {
        self.server.await.unwrap()
    }

    pub async fn disconnect(self) -> ExitStatus {
        let Self {
            reader,
            writer,
            server,
            ..
        } = self;
        drop(writer);
        drop(reader);
        server.await.unwrap()
    }
}
