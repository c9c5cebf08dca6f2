//! Per-document compiler settings
//!
//! Settings come from the editor under the `LPythonLanguageServer` section.
//! Whatever the editor leaves out keeps the server default.

use lsp_types::Uri;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Configuration section requested from the editor
pub const SECTION: &str = "LPythonLanguageServer";

/// Default cap on published problems per document
pub const DEFAULT_MAX_NUMBER_OF_PROBLEMS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub max_number_of_problems: usize,
    pub compiler: CompilerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSettings {
    pub executable_path: String,
    /// Pass the document's directory as an include path
    pub include_document_directory: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Malformed LPythonLanguageServer settings: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Partial settings as sent by the editor
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsPatch {
    max_number_of_problems: Option<usize>,
    compiler: Option<CompilerPatch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompilerPatch {
    executable_path: Option<String>,
    include_document_directory: Option<bool>,
}

impl Settings {
    /// Defaults around the given compiler executable
    pub fn with_compiler(executable_path: impl Into<String>) -> Self {
        Self {
            max_number_of_problems: DEFAULT_MAX_NUMBER_OF_PROBLEMS,
            compiler: CompilerSettings {
                executable_path: executable_path.into(),
                include_document_directory: false,
            },
        }
    }

    /// Overlay the editor's `value` on these settings. `null` changes nothing.
    pub fn merged(&self, value: Value) -> Result<Settings, SettingsError> {
        let patch: SettingsPatch = if value.is_null() {
            SettingsPatch::default()
        } else {
            serde_json::from_value(value)?
        };

        let mut settings = self.clone();
        if let Some(max) = patch.max_number_of_problems {
            settings.max_number_of_problems = max;
        }
        if let Some(compiler) = patch.compiler {
            if let Some(path) = compiler.executable_path.filter(|p| !p.trim().is_empty()) {
                settings.compiler.executable_path = path;
            }
            if let Some(include) = compiler.include_document_directory {
                settings.compiler.include_document_directory = include;
            }
        }
        Ok(settings)
    }
}

impl CompilerSettings {
    /// Arguments placed before the show-errors flag when compiling `uri`
    pub fn extra_args(&self, uri: &Uri) -> Vec<String> {
        if !self.include_document_directory {
            return Vec::new();
        }

        match document_directory(uri) {
            Some(dir) => vec!["-I".to_string(), dir],
            None => Vec::new(),
        }
    }
}

/// Directory of a `file:` document
fn document_directory(uri: &Uri) -> Option<String> {
    let path = url::Url::parse(uri.as_str())
        .ok()
        .and_then(|u| u.to_file_path().ok())?;
    let dir = path.parent()?;
    Some(dir.to_string_lossy().into_owned())
}

/// Settings known to the session
///
/// With configuration pull every document gets its own cached entry;
/// without it one global value applies to all documents.
#[derive(Debug)]
pub struct SettingsStore {
    defaults: Settings,
    global: Settings,
    by_document: HashMap<Uri, Settings>,
    /// Bumped on every bulk clear
    generation: u64,
}

impl SettingsStore {
    pub fn new(defaults: Settings) -> Self {
        Self {
            global: defaults.clone(),
            defaults,
            by_document: HashMap::new(),
            generation: 0,
        }
    }

    pub fn defaults(&self) -> &Settings {
        &self.defaults
    }

    pub fn global(&self) -> &Settings {
        &self.global
    }

    /// Replace the global value from a pushed `didChangeConfiguration`
    /// payload. Anything unusable resets to the defaults.
    pub fn replace_global(&mut self, section: Option<Value>) -> Result<(), SettingsError> {
        let merged = self.defaults.merged(section.unwrap_or(Value::Null));
        self.global = match &merged {
            Ok(settings) => settings.clone(),
            Err(_) => self.defaults.clone(),
        };
        merged.map(|_| ())
    }

    pub fn cached(&self, uri: &Uri) -> Option<Settings> {
        self.by_document.get(uri).cloned()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cache a value fetched during `generation`. A fetch that raced with a
    /// bulk clear is not cached.
    pub fn cache(&mut self, uri: Uri, settings: Settings, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.by_document.insert(uri, settings);
        true
    }

    pub fn forget(&mut self, uri: &Uri) {
        self.by_document.remove(uri);
    }

    pub fn clear(&mut self) {
        self.by_document.clear();
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn uri(s: &str) -> Uri {
        Uri::from_str(s).unwrap()
    }

    #[test]
    fn test_partial_values_keep_defaults() {
        let defaults = Settings::with_compiler("lpython");

        let merged = defaults
            .merged(json!({"maxNumberOfProblems": 5}))
            .unwrap();
        assert_eq!(merged.max_number_of_problems, 5);
        assert_eq!(merged.compiler.executable_path, "lpython");

        let merged = defaults
            .merged(json!({"compiler": {"executablePath": "/opt/bin/lpython"}}))
            .unwrap();
        assert_eq!(merged.max_number_of_problems, 1000);
        assert_eq!(merged.compiler.executable_path, "/opt/bin/lpython");
    }

    #[test]
    fn test_null_and_empty_path_change_nothing() {
        let defaults = Settings::with_compiler("lpython");

        assert_eq!(defaults.merged(Value::Null).unwrap(), defaults);
        assert_eq!(
            defaults
                .merged(json!({"compiler": {"executablePath": ""}}))
                .unwrap(),
            defaults
        );
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let defaults = Settings::with_compiler("lpython");

        assert!(defaults.merged(json!({"maxNumberOfProblems": "many"})).is_err());
        assert!(defaults.merged(json!([1, 2])).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_include_directory_args() {
        let mut compiler = Settings::with_compiler("lpython").compiler;
        let doc = uri("file:///home/user/my%20project/main.py");

        assert!(compiler.extra_args(&doc).is_empty());

        compiler.include_document_directory = true;
        assert_eq!(
            compiler.extra_args(&doc),
            vec!["-I".to_string(), "/home/user/my project".to_string()]
        );
        assert!(compiler.extra_args(&uri("untitled:Untitled-1")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_include_directory_with_localhost_authority() {
        let compiler = CompilerSettings {
            executable_path: "lpython".to_string(),
            include_document_directory: true,
        };

        assert_eq!(
            compiler.extra_args(&uri("file://localhost/home/user/proj/main.py")),
            vec!["-I".to_string(), "/home/user/proj".to_string()]
        );
        assert!(
            compiler
                .extra_args(&uri("file://buildhost/home/user/proj/main.py"))
                .is_empty()
        );
    }

    #[test]
    fn test_store_cache_and_global() {
        let mut store = SettingsStore::new(Settings::with_compiler("lpython"));
        let doc = uri("file:///tmp/foo.lp");

        assert!(store.cached(&doc).is_none());
        assert!(store.cache(doc.clone(), Settings::with_compiler("a"), 0));
        assert_eq!(store.cached(&doc).unwrap().compiler.executable_path, "a");

        store.forget(&doc);
        assert!(store.cached(&doc).is_none());

        let generation = store.generation();
        store.cache(doc.clone(), Settings::with_compiler("b"), generation);
        store.clear();
        assert!(store.cached(&doc).is_none());

        assert!(!store.cache(doc.clone(), Settings::with_compiler("stale"), generation));
        assert!(store.cached(&doc).is_none());

        store
            .replace_global(Some(json!({"maxNumberOfProblems": 3})))
            .unwrap();
        assert_eq!(store.global().max_number_of_problems, 3);

        assert!(store.replace_global(Some(json!("bogus"))).is_err());
        assert_eq!(store.global(), store.defaults());
    }
}
