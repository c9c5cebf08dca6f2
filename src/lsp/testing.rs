//! Testing utilities and mock implementations
//!
//! Provides a recording [`LanguageClient`] so session logic can be tested
//! without a wire connection.

use crate::lsp::client::LanguageClient;
use crate::lsp::error::LspError;
use crate::lsp::protocol::JsonRpcError;
use async_trait::async_trait;
use lsp_types::{ConfigurationParams, MessageType, PublishDiagnosticsParams, Registration};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Mock editor that records everything the server sends
pub struct MockLanguageClient {
    published: Mutex<Vec<PublishDiagnosticsParams>>,
    publish_count: watch::Sender<usize>,
    configuration: Mutex<Option<Value>>,
    configuration_requests: Mutex<Vec<ConfigurationParams>>,
    configuration_delay: Mutex<Option<Duration>>,
    registrations: Mutex<Vec<Registration>>,
    log_messages: Mutex<Vec<(MessageType, String)>>,
}

impl MockLanguageClient {
    /// Create a client whose configuration requests fail
    pub fn new() -> Self {
        let (publish_count, _) = watch::channel(0);
        Self {
            published: Mutex::new(Vec::new()),
            publish_count,
            configuration: Mutex::new(None),
            configuration_requests: Mutex::new(Vec::new()),
            configuration_delay: Mutex::new(None),
            registrations: Mutex::new(Vec::new()),
            log_messages: Mutex::new(Vec::new()),
        }
    }

    /// Answer every configuration item with `value`
    pub fn with_configuration(value: Value) -> Self {
        let client = Self::new();
        client.set_configuration(value);
        client
    }

    pub fn set_configuration(&self, value: Value) {
        *self.configuration.lock().unwrap() = Some(value);
    }

    /// Take `delay` before answering configuration requests
    pub fn set_configuration_delay(&self, delay: Duration) {
        *self.configuration_delay.lock().unwrap() = Some(delay);
    }

    pub fn published(&self) -> Vec<PublishDiagnosticsParams> {
        self.published.lock().unwrap().clone()
    }

    pub fn configuration_requests(&self) -> Vec<ConfigurationParams> {
        self.configuration_requests.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn log_messages(&self) -> Vec<(MessageType, String)> {
        self.log_messages.lock().unwrap().clone()
    }

    /// Wait until at least `count` publishes have been recorded
    pub async fn wait_for_publishes(&self, count: usize) {
        let mut receiver = self.publish_count.subscribe();
        receiver
            .wait_for(|published| *published >= count)
            .await
            .expect("publish counter closed");
    }
}

impl Default for MockLanguageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageClient for MockLanguageClient {
    async fn publish_diagnostics(&self, params: PublishDiagnosticsParams) -> Result<(), LspError> {
        let count = {
            let mut published = self.published.lock().unwrap();
            published.push(params);
            published.len()
        };
        self.publish_count.send_replace(count);
        Ok(())
    }

    async fn workspace_configuration(
        &self,
        params: ConfigurationParams,
    ) -> Result<Vec<Value>, LspError> {
        let items = params.items.len();
        self.configuration_requests.lock().unwrap().push(params);

        let delay = *self.configuration_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.configuration.lock().unwrap().clone() {
            Some(value) => Ok(vec![value; items]),
            None => Err(LspError::JsonRpc(JsonRpcError::Server {
                code: -32601,
                message: "workspace/configuration not supported".to_string(),
            })),
        }
    }

    async fn register_capability(&self, registrations: Vec<Registration>) -> Result<(), LspError> {
        self.registrations.lock().unwrap().extend(registrations);
        Ok(())
    }

    async fn log_message(&self, typ: MessageType, message: String) -> Result<(), LspError> {
        self.log_messages.lock().unwrap().push((typ, message));
        Ok(())
    }
}
