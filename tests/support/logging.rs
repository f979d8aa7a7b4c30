use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        let guard = self.0.lock().unwrap_or_else(|err| err.into_inner());
        String::from_utf8_lossy(&guard).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.0.lock().unwrap_or_else(|err| err.into_inner());
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

static CAPTURED: OnceLock<SharedBuffer> = OnceLock::new();

/// In-memory view of everything logged through the process-wide subscriber.
/// The first caller installs it with `filter`.
pub struct LogCapture {
    buffer: SharedBuffer,
}

impl LogCapture {
    pub fn install(filter: &str) -> Self {
        let buffer = CAPTURED
            .get_or_init(|| {
                let buffer = SharedBuffer::default();
                let writer = buffer.clone();
                let subscriber = tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::new(filter))
                    .with_target(false)
                    .with_ansi(false)
                    .compact()
                    .with_writer(move || writer.clone())
                    .finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
                buffer
            })
            .clone();
        Self { buffer }
    }

    /// Access log lines only.
    pub fn access_lines(&self) -> Vec<String> {
        self.buffer
            .contents()
            .lines()
            .filter(|line| line.contains("target=\"access_log\""))
            .map(str::to_string)
            .collect()
    }
}
