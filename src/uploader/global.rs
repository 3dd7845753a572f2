use std::sync::OnceLock;
use parking_lot::Mutex;
use crate::config::get_config;
use crate::core::Result;
use super::Uploader;

static UPLOADER: OnceLock<Mutex<Option<Uploader>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Uploader>> {
    UPLOADER.get_or_init(|| Mutex::new(None))
}

/// Process-wide uploader, created from the process config on first use.
pub fn get_uploader() -> Result<Uploader> {
    let mut slot = slot().lock();
    if let Some(uploader) = slot.as_ref() {
        return Ok(uploader.clone());
    }

    let uploader = Uploader::from_config(&get_config()?)?;
    *slot = Some(uploader.clone());
    Ok(uploader)
}

/// Replaces the process-wide uploader.
pub fn set_uploader(uploader: Uploader) {
    *slot().lock() = Some(uploader);
}

/// Resets and drops the process-wide uploader, the next `get_uploader` builds a new one.
pub fn reset_uploader() {
    if let Some(uploader) = slot().lock().take() {
        uploader.reset();
    }
}
