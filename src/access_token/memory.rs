//! In-process access token store.

use std::fmt;

use parking_lot::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use super::{AccessTokenStore, wipe_slot};
use crate::{Error, Result};

/// Access token held in process memory for the lifetime of the process.
#[derive(Default)]
pub struct MemoryAccessToken {
    data: Mutex<Option<Zeroizing<Vec<u8>>>>,
    #[cfg(test)]
    last_wiped: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl MemoryAccessToken {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccessTokenStore for MemoryAccessToken {
    fn read(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.data
            .lock()
            .as_ref()
            .map(|data| Zeroizing::new(data.to_vec()))
            .ok_or(Error::NoData)
    }

    fn write(&self, data: Vec<u8>) -> Result<()> {
        let data = Zeroizing::new(data);
        if data.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let mut slot = self.data.lock();
        // The previous token is wiped before it is replaced.
        drop(wipe_slot(&mut slot));
        *slot = Some(data);
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let wiped = wipe_slot(&mut self.data.lock());
        match wiped {
            None => debug!("Access token already cleared"),
            #[cfg(test)]
            Some(buf) => *self.last_wiped.lock() = Some(buf),
            #[cfg(not(test))]
            Some(_) => {}
        }
        Ok(())
    }
}

impl fmt::Debug for MemoryAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAccessToken")
            .field("populated", &self.data.lock().is_some())
            .finish()
    }
}
