//! Output sinks for emitted documents.
//!
//! A sink stores the document produced by a declarative pass, together with
//! its digest and payload files, and provides the pass lock that keeps two
//! passes from mutating the same cluster at once.

mod local;
mod lock;
mod s3;
mod sink;

pub use local::LocalDocumentSink;
pub use lock::{LOCK_EXPIRY_SECS, PassLock, generate_holder_id};
pub use s3::S3DocumentSink;
pub use sink::DocumentSink;

/// File name of the emitted document.
pub const DOCUMENT_FILE: &str = "stratus.json";

/// File name of the stored document digest.
pub const DIGEST_FILE: &str = "stratus.json.sha256";

/// File name of the pass lock.
pub const LOCK_FILE: &str = "pass.lock";
