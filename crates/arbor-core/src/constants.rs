//! Shared constants for wire shaping, size caps, and collaborator deadlines.

use std::time::Duration;

/// Minimum wire width of a streamed token, in bytes.
///
/// Tokens are right-padded to this width before serialization so packet
/// sizes do not leak token lengths (remote keylogging via traffic analysis).
pub const TOKEN_PAD_WIDTH: usize = 16;

/// Padding character appended to short tokens.
pub const TOKEN_PAD_CHAR: char = '\0';

/// Size of the whitespace filler written after a final answer.
///
/// Intermediaries (reverse proxies, browsers) may hold the tail of a
/// response in a buffer; the filler forces the final answer through.
pub const FLUSH_FILLER_LEN: usize = 4096;

/// Maximum accepted size of an inline (base64-decoded) file payload.
pub const MAX_INLINE_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Refresh period of the aborted-generations snapshot.
pub const ABORT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline for a file-store upload.
pub const FILE_UPLOAD_TIMEOUT: Duration = Duration::from_secs(20);

/// Deadline for a web-search query.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for scraping a single search source.
pub const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for tool planning and for each tool execution.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for title generation.
pub const TITLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Title given to conversations that have not been named yet.
pub const DEFAULT_TITLE: &str = "New Chat";
