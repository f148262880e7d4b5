//! Fallback [`OsAdapter`](crate::OsAdapter) for hosts with no platform
//! backend in this crate.

use crate::{CollectOptions, Collected, Error, OsAdapter, Result};

#[derive(Default)]
pub struct StubAdapter;

impl StubAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl OsAdapter for StubAdapter {
    fn collect(&self, _options: &CollectOptions) -> Result<Collected> {
        Err(Error::Unavailable(
            "no process table backend for this platform".to_string(),
        ))
    }
}
