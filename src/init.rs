use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static READY: AtomicBool = AtomicBool::new(false);

/// Process-wide one-time setup, to be called before generating or applying
/// any patch.
///
/// Installs a panic hook reporting engine panics through `log` before
/// handing them to the previously installed hook. Calls after the first one
/// do nothing.
pub fn initialize() {
    INIT.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            log::error!("patch engine panicked: {}", info);
            previous(info);
        }));
        READY.store(true, Ordering::Release);
        log::debug!("patch engine initialized");
    });
}

/// Tests if `initialize` has completed.
pub fn is_initialized() -> bool {
    READY.load(Ordering::Acquire)
}
