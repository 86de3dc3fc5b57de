//! Access token hand-off.
//!
//! The broker-issued token is the only state shared between the
//! authentication engine and whatever consumes the token. Both sides see it
//! through [`AccessTokenStore`], so neither cares whether the bytes live in
//! process memory or in a file on a shared volume.
//!
//! Every variant wipes credential bytes explicitly: [`wipe`] overwrites the
//! buffer in place before the allocation is released, and buffers handed
//! out by [`AccessTokenStore::read`] are `Zeroizing` so copies wipe
//! themselves on drop.

mod file;
mod memory;

pub use file::FileAccessToken;
pub use memory::MemoryAccessToken;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use zeroize::{Zeroize, Zeroizing};

use crate::Result;

/// Capability set over a single access token payload.
///
/// Implementations guard their buffer internally so a store can be shared
/// as `Arc<dyn AccessTokenStore>` between the writer and its readers.
pub trait AccessTokenStore: Send + Sync + fmt::Debug {
    /// Copy of the current token.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoData` when nothing has been written (or the token
    /// was deleted).
    fn read(&self) -> Result<Zeroizing<Vec<u8>>>;

    /// Replace the current token. The store takes ownership of `data`.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyPayload` for an empty payload.
    fn write(&self, data: Vec<u8>) -> Result<()>;

    /// Wipe and drop the current token.
    fn delete(&self) -> Result<()>;
}

/// Overwrite `buf` with zeros, keeping its length.
pub fn wipe(buf: &mut [u8]) {
    buf.zeroize();
}

/// Wipe the buffer held in `slot` and empty the slot.
///
/// Returns the wiped buffer (all zeros, original length) so callers decide
/// when the allocation goes away; `None` when the slot was already empty.
pub(crate) fn wipe_slot(slot: &mut Option<Zeroizing<Vec<u8>>>) -> Option<Zeroizing<Vec<u8>>> {
    let mut buf = slot.take()?;
    wipe(&mut buf);
    Some(buf)
}

/// Default store for a configuration: file-backed when a path is given,
/// in-memory otherwise.
pub fn default_store(path: Option<PathBuf>) -> Arc<dyn AccessTokenStore> {
    match path {
        Some(path) => Arc::new(FileAccessToken::new(path)),
        None => Arc::new(MemoryAccessToken::new()),
    }
}
