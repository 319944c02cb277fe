//! Mutable state slot exchanged with the host runtime

/// The record a host runtime hands to READ/WRITE/CLEAR.
///
/// Operations read the caller's view out of it and write the new view back
/// into it: READ populates all three fields, WRITE advances the version
/// token, CLEAR resets it.
#[derive(Debug, Clone)]
pub struct StateSlot<T> {
    /// Current payload; None when no record exists
    pub data: Option<T>,
    /// Version token of the revision the caller last observed
    pub etag: Option<String>,
    /// Whether a record existed when the slot was last populated
    pub record_exists: bool,
}

impl<T> StateSlot<T> {
    pub fn new() -> Self {
        Self {
            data: None,
            etag: None,
            record_exists: false,
        }
    }

    /// A slot carrying a payload about to be written for the first time.
    pub fn with_data(data: T) -> Self {
        Self {
            data: Some(data),
            etag: None,
            record_exists: false,
        }
    }

    /// Reset to the no-record state.
    pub fn reset(&mut self) {
        self.data = None;
        self.etag = None;
        self.record_exists = false;
    }
}

impl<T> Default for StateSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
