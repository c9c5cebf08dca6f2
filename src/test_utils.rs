//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and helpers for
//! standing up fake compilers and in-memory editor connections.

use std::path::Path;

/// Test logging utilities
#[cfg(feature = "test-logging")]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, defaulting to debug for this crate and info for
    /// tokio. Output goes through the test writer so it is captured per test.
    ///
    /// ```bash
    /// RUST_LOG=lpython_lsp::server=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .init();
        });
    }

    #[ctor::ctor]
    fn init_test_logging() {
        init();
    }
}

/// Write a shell script standing in for the compiler.
///
/// Returns the executable and leading arguments to run it with. The script
/// is run through `/bin/sh` so it never has to be exec'd directly, which
/// avoids ETXTBSY races with other tests spawning processes. Inside the
/// script `$1` is `--show-errors` and `$2` the input file.
#[cfg(unix)]
pub fn fake_compiler(dir: &Path, body: &str) -> (String, Vec<String>) {
    let script = dir.join("fake-lpython.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write fake compiler");
    (
        "/bin/sh".to_string(),
        vec![script.to_string_lossy().into_owned()],
    )
}

/// Frame a JSON value the way an editor client would
pub fn frame(message: &serde_json::Value) -> String {
    let body = message.to_string();
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
}
