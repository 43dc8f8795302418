//! WebDAV protocol helpers
//!
//! Path canonicalisation and header parsing used by request handlers before
//! they call into the lock manager.

pub mod headers;
pub mod path;

pub use headers::{
    format_lock_token, lock_token_from_header, lock_tokens_from_if, parse_depth,
    parse_destination, parse_timeout,
};
pub use path::{ROOT, clean_path, is_canonical, normalize, parent_path, strip_context_path};
