//! Subscriber setup.
//!
//! Events always go to stderr, filtered by `RUST_LOG` or the configured
//! level. When a log file is configured, a second plain-text layer appends to
//! it with its own level.

use crate::config::Config;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Install the global subscriber for `config`.
pub fn init(config: &Config) -> io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let file = match config.log_file {
        Some(ref path) => Some(file_layer(open_log_file(path)?, &config.file_log_level)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_thread_names(true).with_filter(filter))
        .with(file)
        .init();

    Ok(())
}

/// Open `path` for appending, creating missing parent directories.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Plain-text layer writing to `file`, keeping events at `level` and above
pub fn file_layer<S>(file: File, level: &str) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(Mutex::new(file))
        .with_filter(EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;
    use tracing::{debug, info, trace};

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("shedding-server-{}-{}", name, process::id()))
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = scratch_dir("logs-nested");
        let path = dir.join("logs").join("server.log");

        open_log_file(&path).unwrap();
        assert!(path.exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_open_appends() {
        let dir = scratch_dir("logs-append");
        let path = dir.join("server.log");
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "earlier\n").unwrap();

        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            file.write_all(b"later\n").unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier\nlater\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_layer_honours_level() {
        let dir = scratch_dir("logs-level");
        let path = dir.join("server.log");
        let file = open_log_file(&path).unwrap();

        let subscriber = tracing_subscriber::registry().with(file_layer(file, "debug"));
        tracing::subscriber::with_default(subscriber, || {
            info!(port = 8000, "Server listening");
            debug!("Sent response");
            trace!("Processing request");
        });

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("Server listening"));
        assert!(written.contains("port=8000"));
        assert!(written.contains("Sent response"));
        assert!(!written.contains("Processing request"));
        assert!(!written.contains('\u{1b}'));

        fs::remove_dir_all(&dir).unwrap();
    }
}
