//! Document session
//!
//! Owns everything one editor connection accumulates: open documents, their
//! settings, and per document a throttled trigger feeding a single
//! validation worker. The worker runs one validation at a time, so a
//! document never has two compiler runs in flight.

use crate::io::{CompileRequest, CompilerRunner, ProcessError};
use crate::log_timing;
use crate::lsp::{LanguageClient, LspError, NegotiatedCapabilities};
use crate::server::debounce::ThrottledTrigger;
use crate::server::diagnostics::{TranslateError, translate};
use crate::server::document::TextDocument;
use crate::server::settings::{SECTION, Settings, SettingsStore};
use lsp_types::notification::{DidChangeConfiguration, Notification};
use lsp_types::{
    ConfigurationItem, ConfigurationParams, DidChangeConfigurationParams,
    DidChangeTextDocumentParams, DidChangeWatchedFilesParams, DidChangeWorkspaceFoldersParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, MessageType,
    PublishDiagnosticsParams, Registration, Uri,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, info, trace, warn};

/// Why a validation cycle stopped before publishing
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Client does not accept diagnostic related information")]
    MissingCapability,

    #[error("Document is not open: {uri}")]
    DocumentClosed { uri: String },

    #[error("Compiler run failed: {0}")]
    Compiler(#[from] ProcessError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("Failed to publish diagnostics: {0}")]
    Publish(#[from] LspError),
}

impl ValidationError {
    fn closed(uri: &Uri) -> Self {
        Self::DocumentClosed {
            uri: uri.as_str().to_string(),
        }
    }
}

struct OpenDocument {
    document: TextDocument,
    trigger: ThrottledTrigger<Uri>,
    /// Direct line to the worker, bypassing the throttle
    validations: mpsc::UnboundedSender<Uri>,
    worker: JoinHandle<()>,
}

impl Drop for OpenDocument {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct SessionState {
    capabilities: NegotiatedCapabilities,
    client: Arc<dyn LanguageClient>,
    compiler: Arc<dyn CompilerRunner>,
    documents: Mutex<HashMap<Uri, OpenDocument>>,
    settings: Mutex<SettingsStore>,
}

/// State of one editor session
pub struct DocumentSession {
    state: Arc<SessionState>,
    debounce: Duration,
}

impl DocumentSession {
    pub fn new(
        capabilities: NegotiatedCapabilities,
        client: Arc<dyn LanguageClient>,
        compiler: Arc<dyn CompilerRunner>,
        defaults: Settings,
        debounce: Duration,
    ) -> Self {
        debug!(
            "Creating document session ({:?}, debounce {:?})",
            capabilities, debounce
        );
        Self {
            state: Arc::new(SessionState {
                capabilities,
                client,
                compiler,
                documents: Mutex::new(HashMap::new()),
                settings: Mutex::new(SettingsStore::new(defaults)),
            }),
            debounce,
        }
    }

    /// The editor finished initialization. Registers for configuration
    /// changes in the background when settings are pulled.
    pub fn initialized(&self) {
        if !self.state.capabilities.configuration_pull {
            return;
        }

        let client = Arc::clone(&self.state.client);
        tokio::spawn(async move {
            let registration = Registration {
                id: uuid::Uuid::new_v4().to_string(),
                method: DidChangeConfiguration::METHOD.to_string(),
                register_options: None,
            };
            match client.register_capability(vec![registration]).await {
                Ok(()) => debug!("Registered for configuration changes"),
                Err(e) => warn!("Failed to register for configuration changes: {}", e),
            }
        });
    }

    pub async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = TextDocument::new(params.text_document);
        let uri = document.uri.clone();
        info!(
            "Opened {} ({}, version {})",
            uri.as_str(),
            document.language_id,
            document.version
        );

        let (validations, requests) = mpsc::unbounded_channel();
        let worker = tokio::spawn(validation_worker(Arc::downgrade(&self.state), requests));
        let trigger = {
            let validations = validations.clone();
            ThrottledTrigger::spawn(self.debounce, move |uri: Uri| {
                if validations.send(uri).is_err() {
                    trace!("Validation worker gone");
                }
            })
        };

        let mut documents = self.state.documents.lock().await;
        trigger.signal(uri.clone());
        let previous = documents.insert(
            uri.clone(),
            OpenDocument {
                document,
                trigger,
                validations,
                worker,
            },
        );
        if previous.is_some() {
            warn!("{} was opened twice, keeping the newer copy", uri.as_str());
        }
    }

    pub async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let mut documents = self.state.documents.lock().await;

        let Some(open) = documents.get_mut(&uri) else {
            warn!("Ignoring change for unknown document {}", uri.as_str());
            return;
        };

        open.document
            .apply_changes(params.text_document.version, params.content_changes);
        trace!(
            "{} is now at version {} ({} bytes)",
            uri.as_str(),
            open.document.version,
            open.document.text.len()
        );
        open.trigger.signal(uri);
    }

    pub async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;

        let removed = {
            let mut documents = self.state.documents.lock().await;
            let removed = documents.remove(&uri);
            self.state.settings.lock().await.forget(&uri);
            removed
        };

        match removed {
            Some(_) => info!("Closed {}", uri.as_str()),
            None => debug!("Ignoring close for unknown document {}", uri.as_str()),
        }
    }

    /// Settings changed. Pulled settings are dropped from the cache, pushed
    /// ones replace the global value; then every open document is validated
    /// again.
    pub async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        {
            let mut settings = self.state.settings.lock().await;
            if self.state.capabilities.configuration_pull {
                debug!("Clearing cached document settings");
                settings.clear();
            } else if let Err(e) = settings.replace_global(params.settings.get(SECTION).cloned())
            {
                warn!("{}, using defaults", e);
            }
        }

        let documents = self.state.documents.lock().await;
        info!("Configuration changed, revalidating {} documents", documents.len());
        for (uri, open) in documents.iter() {
            if open.validations.send(uri.clone()).is_err() {
                trace!("Validation worker for {} gone", uri.as_str());
            }
        }
    }

    pub async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        info!("Received {} watched file changes", params.changes.len());
        self.log_to_client(format!(
            "Received file change event ({} files)",
            params.changes.len()
        ))
        .await;
    }

    pub async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        let event = params.event;
        info!(
            "Workspace folders changed: {} added, {} removed",
            event.added.len(),
            event.removed.len()
        );
        self.log_to_client("Workspace folder change event received".to_string())
            .await;
    }

    async fn log_to_client(&self, message: String) {
        if let Err(e) = self
            .state
            .client
            .log_message(MessageType::INFO, message)
            .await
        {
            debug!("Failed to send log message: {}", e);
        }
    }

    #[cfg(test)]
    pub async fn document(&self, uri: &Uri) -> Option<TextDocument> {
        self.state.snapshot(uri).await
    }
}

impl SessionState {
    async fn snapshot(&self, uri: &Uri) -> Option<TextDocument> {
        self.documents
            .lock()
            .await
            .get(uri)
            .map(|open| open.document.clone())
    }

    async fn is_open(&self, uri: &Uri) -> bool {
        self.documents.lock().await.contains_key(uri)
    }

    /// One validation cycle: snapshot, settings, compile, translate, publish
    async fn validate(&self, uri: &Uri) -> Result<usize, ValidationError> {
        if !self.capabilities.diagnostic_related_info {
            return Err(ValidationError::MissingCapability);
        }

        let snapshot = self
            .snapshot(uri)
            .await
            .ok_or_else(|| ValidationError::closed(uri))?;
        let settings = self.document_settings(uri).await;

        let output = self
            .compiler
            .run(CompileRequest {
                source: snapshot.text,
                executable: settings.compiler.executable_path.clone(),
                extra_args: settings.compiler.extra_args(uri),
            })
            .await?;
        if !output.outcome.is_success() {
            debug!(
                "Compiler ended with {:?} for {}, reading its report anyway",
                output.outcome,
                uri.as_str()
            );
        }

        let mut diagnostics = translate(&output.stdout)?;
        diagnostics.truncate(settings.max_number_of_problems);

        // Closed while the compiler ran
        if !self.is_open(uri).await {
            return Err(ValidationError::closed(uri));
        }

        let published = diagnostics.len();
        self.client
            .publish_diagnostics(PublishDiagnosticsParams {
                uri: uri.clone(),
                diagnostics,
                version: Some(snapshot.version),
            })
            .await?;

        Ok(published)
    }

    /// Settings for `uri`. Failed fetches fall back to the defaults and are
    /// not cached.
    async fn document_settings(&self, uri: &Uri) -> Settings {
        let (defaults, generation) = {
            let settings = self.settings.lock().await;
            if !self.capabilities.configuration_pull {
                return settings.global().clone();
            }
            if let Some(cached) = settings.cached(uri) {
                return cached;
            }
            (settings.defaults().clone(), settings.generation())
        };

        let params = ConfigurationParams {
            items: vec![ConfigurationItem {
                scope_uri: Some(uri.clone()),
                section: Some(SECTION.to_string()),
            }],
        };

        let value = match self.client.workspace_configuration(params).await {
            Ok(mut values) => values.pop().unwrap_or(Value::Null),
            Err(e) if e.is_timeout() => {
                warn!(
                    "Client did not answer the configuration request for {}, using defaults",
                    uri.as_str()
                );
                return defaults;
            }
            Err(e) => {
                warn!(
                    "Configuration request for {} failed: {}, using defaults",
                    uri.as_str(),
                    e
                );
                return defaults;
            }
        };

        match defaults.merged(value) {
            Ok(settings) => {
                // Documents stay locked so a concurrent close cannot forget
                // the entry before it is inserted
                let documents = self.documents.lock().await;
                if documents.contains_key(uri) {
                    self.settings
                        .lock()
                        .await
                        .cache(uri.clone(), settings.clone(), generation);
                }
                settings
            }
            Err(e) => {
                warn!("{}, using defaults for {}", e, uri.as_str());
                defaults
            }
        }
    }
}

async fn validation_worker(session: Weak<SessionState>, mut requests: mpsc::UnboundedReceiver<Uri>) {
    while let Some(mut uri) = requests.recv().await {
        // Requests that queued up during the last run collapse into one
        while let Ok(newer) = requests.try_recv() {
            uri = newer;
        }

        let Some(state) = session.upgrade() else {
            break;
        };

        let started = Instant::now();
        match state.validate(&uri).await {
            Ok(published) => {
                debug!("Published {} diagnostics for {}", published, uri.as_str());
                log_timing!(Level::DEBUG, "validate", started.elapsed());
            }
            Err(ValidationError::MissingCapability) => {
                warn!(
                    "Trying to validate {} without diagnostic capability",
                    uri.as_str()
                );
            }
            Err(e @ ValidationError::DocumentClosed { .. }) => debug!("{}", e),
            Err(e) => error!("Validation of {} failed: {}", uri.as_str(), e),
        }
    }

    trace!("Validation worker finished");
}
