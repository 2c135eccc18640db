//! Session logging
//!
//! Every run writes a full trace of the update engine to
//! `<temp>/upsync-{uuid}.log`, so a failed install can be diagnosed after the
//! fact. The terminal only gets the binary's own messages plus warnings from
//! the library crates; their step-by-step events would repeat the status
//! lines printed by [`crate::progress`].

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::progress::ProgressWriter;

/// File filter used when `RUST_LOG` is unset
const FILE_DIRECTIVES: &str = "warn,upsync=trace";

/// Handle for the log of one run
pub struct SessionLog {
    /// Where the trace is written
    pub path: PathBuf,
    /// Flushes pending lines when dropped
    pub guard: WorkerGuard,
}

/// Console directives. Target matching is by prefix, so `upsync` alone would
/// also let the library crates through at the same level.
fn console_directives(verbose: bool) -> &'static str {
    if verbose {
        "warn,upsync=debug"
    } else {
        "warn,upsync=info,upsync_core=warn,upsync_mirror=warn"
    }
}

/// Install the global subscriber: trace file plus filtered console output.
///
/// Keep the returned guard alive until exit or the tail of the file is lost.
pub fn init(verbose: bool) -> SessionLog {
    let dir = std::env::temp_dir();
    let file_name = format!("upsync-{}.log", uuid::Uuid::new_v4());
    let path = dir.join(&file_name);

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &file_name));
    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(FILE_DIRECTIVES));
    let file = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    let console = tracing_subscriber::fmt::layer()
        .with_writer(ProgressWriter)
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::new(console_directives(verbose)));

    tracing_subscriber::registry().with(file).with(console).init();

    SessionLog { path, guard }
}
