//! Utility modules.

pub mod file;
pub mod logging;
pub mod retry;
pub mod text;

pub use file::{calculate_checksum, file_extension, is_binary_extension, sanitize_filename};
pub use logging::init_logger;
pub use retry::{Backoff, Retryable, with_retry};
pub use text::{collapse_newlines, truncate_chars};
