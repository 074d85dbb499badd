use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

use super::{OutputError, OutputResult};

/// Install the global subscriber.
///
/// With a log file, events are appended as JSON lines with RFC 3339 UTC
/// timestamps (default level `info`). Without one, a compact layer writes to
/// stderr (default level `warn`). `RUST_LOG` overrides either default.
pub fn init_logging(log_file: Option<&Path>) -> OutputResult<()> {
    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let file = Arc::new(Mutex::new(file));
            let make_writer = BoxMakeWriter::new(move || SharedWriter {
                file: Arc::clone(&file),
            });

            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(make_writer)
                .with_filter(env_filter("info"));
            tracing_subscriber::registry().with(layer).try_init()
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_filter(env_filter("warn"));
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    result.map_err(|err| OutputError::Logging(err.to_string()))
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

struct SharedWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "failed to lock log file"))?;
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "failed to lock log file"))?;
        file.flush()
    }
}
