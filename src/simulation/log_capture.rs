//! Logger stamping records with virtual time and capturing warnings.
//!
//! [`SimTimeLogger`] wraps an `env_logger::Logger`. Every record is forwarded to
//! it with the current simulation time prepended, mirroring how the rest of the
//! crate talks about "when" something happened. Warnings and errors are also
//! copied into a per-thread buffer so that tests (which each run their
//! simulation on their own thread) can assert that a degenerate case was reported.

use log::{Level, Log, Metadata, Record};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Once;
use std::time::Duration;

use crate::time_driver::current_time;

/// Maximum number of captured entries kept per thread.
const LOG_BUFFER_CAPACITY: usize = 1000;

/// A captured warning or error.
#[derive(Debug, Clone)]
pub struct CapturedLogEntry {
    pub timestamp: Option<Duration>,
    pub level: Level,
    pub target: String,
    pub content: String,
}

thread_local! {
    static CAPTURED_LOGS: RefCell<VecDeque<CapturedLogEntry>> = RefCell::new(VecDeque::new());
}

/// Drain all entries captured on the calling thread.
pub fn drain_captured_logs() -> Vec<CapturedLogEntry> {
    CAPTURED_LOGS.with(|logs| logs.borrow_mut().drain(..).collect())
}

fn push_log_entry(entry: CapturedLogEntry) {
    CAPTURED_LOGS.with(|logs| {
        let mut logs = logs.borrow_mut();
        if logs.len() >= LOG_BUFFER_CAPACITY {
            logs.pop_front();
        }
        logs.push_back(entry);
    });
}

/// Render a virtual timestamp the way log lines show it.
fn format_sim_time(timestamp: Option<Duration>) -> String {
    match timestamp {
        Some(t) => format!("[t={:.9}s]", t.as_secs_f64()),
        None => "[t=-]".to_string(),
    }
}

/// Logger that prefixes records with the simulation time.
pub struct SimTimeLogger {
    inner: env_logger::Logger,
}

impl SimTimeLogger {
    pub fn new(inner: env_logger::Logger) -> Self {
        Self { inner }
    }

    /// Maximum log level accepted by the inner logger.
    pub fn filter(&self) -> log::LevelFilter {
        self.inner.filter()
    }

    /// Install as the global logger.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let filter = self.filter();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(filter);
        Ok(())
    }
}

impl Log for SimTimeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // Warnings are captured even when the console filter hides them.
        metadata.level() <= Level::Warn || self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        let timestamp = current_time();
        if record.level() <= Level::Warn {
            push_log_entry(CapturedLogEntry {
                timestamp,
                level: record.level(),
                target: record.target().to_string(),
                content: record.args().to_string(),
            });
        }
        if self.inner.enabled(record.metadata()) {
            let stamp = format_sim_time(timestamp);
            self.inner.log(
                &Record::builder()
                    .args(format_args!("{} {}", stamp, record.args()))
                    .metadata(record.metadata().clone())
                    .module_path(record.module_path())
                    .file(record.file())
                    .line(record.line())
                    .build(),
            );
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

static TEST_LOGGER: Once = Once::new();

/// Install a quiet logger once per process so tests can read captured warnings.
pub fn init_for_tests() {
    TEST_LOGGER.call_once(|| {
        let inner = env_logger::Builder::new()
            .filter_level(log::LevelFilter::Error)
            .is_test(true)
            .build();
        let _ = log::set_boxed_logger(Box::new(SimTimeLogger::new(inner)));
        log::set_max_level(log::LevelFilter::Warn);
    });
}
