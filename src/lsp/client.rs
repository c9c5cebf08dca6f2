//! Client-facing LSP API
//!
//! Typed wrappers for everything the server sends to the editor. The
//! session talks to the editor only through [`LanguageClient`], so tests can
//! swap the real connection for a recording mock.

use crate::lsp::error::LspError;
use crate::lsp::protocol::Connection;
use async_trait::async_trait;
use lsp_types::notification::{LogMessage, Notification, PublishDiagnostics};
use lsp_types::request::{RegisterCapability, Request, WorkspaceConfiguration};
use lsp_types::{
    ConfigurationParams, LogMessageParams, MessageType, PublishDiagnosticsParams, Registration,
    RegistrationParams,
};
use serde_json::Value;
use tracing::debug;

/// Operations the server performs on the editor
#[async_trait]
pub trait LanguageClient: Send + Sync {
    /// `textDocument/publishDiagnostics`
    async fn publish_diagnostics(&self, params: PublishDiagnosticsParams) -> Result<(), LspError>;

    /// `workspace/configuration`; one value per requested item
    async fn workspace_configuration(
        &self,
        params: ConfigurationParams,
    ) -> Result<Vec<Value>, LspError>;

    /// `client/registerCapability`
    async fn register_capability(&self, registrations: Vec<Registration>) -> Result<(), LspError>;

    /// `window/logMessage`
    async fn log_message(&self, typ: MessageType, message: String) -> Result<(), LspError>;
}

#[async_trait]
impl LanguageClient for Connection {
    async fn publish_diagnostics(&self, params: PublishDiagnosticsParams) -> Result<(), LspError> {
        debug!(
            "Publishing {} diagnostics for {}",
            params.diagnostics.len(),
            params.uri.as_str()
        );
        self.notify(PublishDiagnostics::METHOD, params)?;
        Ok(())
    }

    async fn workspace_configuration(
        &self,
        params: ConfigurationParams,
    ) -> Result<Vec<Value>, LspError> {
        let requested = params.items.len();
        let values: Vec<Value> = self.request(WorkspaceConfiguration::METHOD, params).await?;

        if values.len() != requested {
            return Err(LspError::UnexpectedResponse {
                method: WorkspaceConfiguration::METHOD.to_string(),
                reason: format!("expected {} items, got {}", requested, values.len()),
            });
        }

        Ok(values)
    }

    async fn register_capability(&self, registrations: Vec<Registration>) -> Result<(), LspError> {
        let _: Value = self
            .request(
                RegisterCapability::METHOD,
                RegistrationParams { registrations },
            )
            .await?;
        Ok(())
    }

    async fn log_message(&self, typ: MessageType, message: String) -> Result<(), LspError> {
        self.notify(LogMessage::METHOD, LogMessageParams { typ, message })?;
        Ok(())
    }
}
