//! Formcrawl Core - Common infrastructure for resumable form crawls
//!
//! This crate provides the ambient pieces shared by the crawl engine, the
//! upstream collaborators and the CLI: logging, progress bars, graceful
//! shutdown, blocking HTTP over a shared runtime, backoff, work distribution
//! and the background conversion queue.

pub mod conversion;
pub mod http;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod work_queue;

// Re-exports for convenience
pub use conversion::{ConversionQueue, ConversionStats, ConvertError, Converter};
pub use http::{
    FetchError, HttpSettings, MAX_BODY_BYTES, SHARED_RUNTIME, block_on, send_and_read, session_client,
};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{backoff_duration, retry_with_backoff};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag};
pub use work_queue::{WorkQueue, round_robin};
