//! Language server lifecycle and dispatch
//!
//! Messages from the editor are handled strictly in arrival order. Requests
//! are answered inline; document notifications go to the
//! [`DocumentSession`] created at `initialize`.

pub mod debounce;
pub mod diagnostics;
pub mod document;
pub mod line_index;
pub mod session;
pub mod settings;

#[cfg(test)]
mod tests;

use crate::config::ServerConfig;
use crate::io::{CompilerRunner, Transport};
use crate::lsp::jsonrpc_utils::{
    error_codes, error_response, method_not_found_response, null_success_response,
    success_response,
};
use crate::lsp::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::lsp::{Connection, Incoming, NegotiatedCapabilities};
use lsp_types::notification::{
    DidChangeConfiguration, DidChangeTextDocument, DidChangeWatchedFiles,
    DidChangeWorkspaceFolders, DidCloseTextDocument, DidOpenTextDocument, Exit, Initialized,
    Notification,
};
use lsp_types::request::{Initialize, Request, Shutdown};
use lsp_types::InitializeParams;
use serde::de::DeserializeOwned;
use serde_json::Value;
use session::DocumentSession;
use settings::Settings;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Errors that end the dispatch loop
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Lost connection to the editor: {0}")]
    Connection(#[from] JsonRpcError),
}

/// How the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// `exit` (or end of input) after `shutdown`
    Clean,
    /// The editor went away without asking for `shutdown` first
    WithoutShutdown,
}

impl ExitStatus {
    /// Process exit code expected by editors
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::WithoutShutdown => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
    ShuttingDown,
}

/// Serve one editor over `transport` until it exits or disconnects
pub async fn serve<T: Transport + 'static>(
    transport: T,
    config: ServerConfig,
    compiler: Arc<dyn CompilerRunner>,
) -> ExitStatus {
    let (connection, incoming) = Connection::new(transport, config.request_timeout);
    LanguageServer::new(connection, config, compiler)
        .run(incoming)
        .await
}

pub struct LanguageServer {
    connection: Connection,
    config: ServerConfig,
    compiler: Arc<dyn CompilerRunner>,
    phase: Phase,
    session: Option<DocumentSession>,
}

impl LanguageServer {
    pub fn new(
        connection: Connection,
        config: ServerConfig,
        compiler: Arc<dyn CompilerRunner>,
    ) -> Self {
        Self {
            connection,
            config,
            compiler,
            phase: Phase::Uninitialized,
            session: None,
        }
    }

    /// Dispatch loop. Dropping the session on return stops every trigger
    /// and worker.
    pub async fn run(mut self, mut incoming: mpsc::UnboundedReceiver<Incoming>) -> ExitStatus {
        info!("Language server ready, compiler: {}", self.config.compiler_path);

        while let Some(message) = incoming.recv().await {
            match message {
                Incoming::Request(request) => {
                    if let Err(e) = self.handle_request(request) {
                        error!("{}", e);
                        break;
                    }
                }
                Incoming::Notification(notification) if notification.method == Exit::METHOD => {
                    info!("Exit requested");
                    return self.exit_status();
                }
                Incoming::Notification(notification) => {
                    self.handle_notification(notification).await;
                }
            }
        }

        info!("Editor disconnected");
        self.exit_status()
    }

    fn exit_status(&self) -> ExitStatus {
        if self.phase == Phase::ShuttingDown {
            ExitStatus::Clean
        } else {
            warn!("Exiting without shutdown request");
            ExitStatus::WithoutShutdown
        }
    }

    fn handle_request(&mut self, request: JsonRpcRequest) -> Result<(), ServerError> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        let response = match (self.phase, method.as_str()) {
            (Phase::Uninitialized, Initialize::METHOD) => self.initialize(id, params),
            (_, Initialize::METHOD) => error_response(
                id,
                error_codes::INVALID_REQUEST,
                "Server is already initialized".to_string(),
            ),
            (Phase::Uninitialized, _) => error_response(
                id,
                error_codes::SERVER_NOT_INITIALIZED,
                format!("Received {method} before initialize"),
            ),
            (Phase::ShuttingDown, _) => error_response(
                id,
                error_codes::INVALID_REQUEST,
                format!("Received {method} after shutdown"),
            ),
            (Phase::Running, Shutdown::METHOD) => {
                info!("Shutdown requested");
                self.phase = Phase::ShuttingDown;
                null_success_response(id)
            }
            (Phase::Running, _) => {
                debug!("Unsupported request {}", method);
                method_not_found_response(id, &method)
            }
        };

        self.connection.respond(response)?;
        Ok(())
    }

    fn initialize(&mut self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => {
                return error_response(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("Invalid initialize params: {e}"),
                );
            }
        };

        if let Some(client) = &params.client_info {
            info!(
                "Initializing for {} {}",
                client.name,
                client.version.as_deref().unwrap_or("")
            );
        }

        let capabilities = NegotiatedCapabilities::negotiate(&params.capabilities);
        info!("Negotiated capabilities: {:?}", capabilities);

        let result = match serde_json::to_value(capabilities.initialize_result()) {
            Ok(result) => result,
            Err(e) => {
                return error_response(
                    id,
                    error_codes::INTERNAL_ERROR,
                    format!("Failed to encode capabilities: {e}"),
                );
            }
        };

        self.session = Some(DocumentSession::new(
            capabilities,
            Arc::new(self.connection.clone()),
            Arc::clone(&self.compiler),
            Settings::with_compiler(&self.config.compiler_path),
            self.config.debounce,
        ));
        self.phase = Phase::Running;

        success_response(id, result)
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;

        let session = match (&self.session, self.phase) {
            (Some(session), Phase::Running) => session,
            _ => {
                debug!("Dropping {} outside of a running session", method);
                return;
            }
        };

        match method.as_str() {
            Initialized::METHOD => session.initialized(),
            DidOpenTextDocument::METHOD => {
                if let Some(params) = parse_notification(&method, params) {
                    session.did_open(params).await;
                }
            }
            DidChangeTextDocument::METHOD => {
                if let Some(params) = parse_notification(&method, params) {
                    session.did_change(params).await;
                }
            }
            DidCloseTextDocument::METHOD => {
                if let Some(params) = parse_notification(&method, params) {
                    session.did_close(params).await;
                }
            }
            DidChangeConfiguration::METHOD => {
                if let Some(params) = parse_notification(&method, params) {
                    session.did_change_configuration(params).await;
                }
            }
            DidChangeWatchedFiles::METHOD => {
                if let Some(params) = parse_notification(&method, params) {
                    session.did_change_watched_files(params).await;
                }
            }
            DidChangeWorkspaceFolders::METHOD => {
                if let Some(params) = parse_notification(&method, params) {
                    session.did_change_workspace_folders(params).await;
                }
            }
            other if other.starts_with("$/") => trace!("Ignoring {}", other),
            other => debug!("Ignoring unhandled notification {}", other),
        }
    }
}

fn parse_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P, serde_json::Error> {
    serde_json::from_value(params.unwrap_or(Value::Null))
}

fn parse_notification<P: DeserializeOwned>(method: &str, params: Option<Value>) -> Option<P> {
    match parse_params(params) {
        Ok(params) => Some(params),
        Err(e) => {
            warn!("Dropping {} with invalid params: {}", method, e);
            None
        }
    }
}
