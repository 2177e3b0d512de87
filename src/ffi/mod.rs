//! C ABI for foreign code holding raw record pointers
//!
//! Foreign readers (buffer consumers, embedding code) see records as opaque
//! `*mut ObjectHeader` pointers and manage their counts through these entry
//! points. Every function takes the interpreter lock.

mod refcount;

pub use refcount::{pybridge_decref, pybridge_incref, pybridge_refcount};
