//! A persistent set of record digests.
//!
//! Lets a transfer skip records whose exact content was already sent by an
//! earlier run. Records are identified by the SHA-256 of their JSON encoding;
//! the set lives in a plain text file, one hex digest per line.

mod error;
mod store;

pub use error::{HashStoreError, Result};
pub use store::{Digest, HashStore, digest};
