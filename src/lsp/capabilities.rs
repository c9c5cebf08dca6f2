//! Capability negotiation
//!
//! The optional client features the server cares about are read once from
//! the `initialize` request and never change for the rest of the session.

use lsp_types::{
    ClientCapabilities, InitializeResult, ServerCapabilities, ServerInfo,
    TextDocumentSyncCapability, TextDocumentSyncKind, WorkspaceFoldersServerCapabilities,
    WorkspaceServerCapabilities,
};

/// Client features established at `initialize`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiatedCapabilities {
    /// Client answers `workspace/configuration`
    pub configuration_pull: bool,

    /// Client supports workspace folders
    pub workspace_folders: bool,

    /// Client accepts related information on diagnostics
    pub diagnostic_related_info: bool,
}

impl NegotiatedCapabilities {
    /// Read the relevant flags; absent means unsupported
    pub fn negotiate(client: &ClientCapabilities) -> Self {
        let workspace = client.workspace.as_ref();

        let configuration_pull = workspace.and_then(|w| w.configuration).unwrap_or(false);
        let workspace_folders = workspace
            .and_then(|w| w.workspace_folders)
            .unwrap_or(false);
        let diagnostic_related_info = client
            .text_document
            .as_ref()
            .and_then(|t| t.publish_diagnostics.as_ref())
            .and_then(|p| p.related_information)
            .unwrap_or(false);

        Self {
            configuration_pull,
            workspace_folders,
            diagnostic_related_info,
        }
    }

    /// What the server advertises back
    pub fn server_capabilities(&self) -> ServerCapabilities {
        let workspace = self
            .workspace_folders
            .then(|| WorkspaceServerCapabilities {
                workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                    supported: Some(true),
                    change_notifications: None,
                }),
                file_operations: None,
            });

        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Kind(
                TextDocumentSyncKind::INCREMENTAL,
            )),
            workspace,
            ..ServerCapabilities::default()
        }
    }

    /// Full `initialize` result
    pub fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            capabilities: self.server_capabilities(),
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        }
    }
}
