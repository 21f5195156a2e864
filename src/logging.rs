use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG: AtomicBool = AtomicBool::new(false);

pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Per-entry progress line, printed only under `--debug`.
pub fn debug(message: impl AsRef<str>) {
    if debug_enabled() {
        eprintln!("meyem: {}", message.as_ref());
    }
}
