//! Host properties exposed to scripts.

use rhai::{Dynamic, Engine};
use sf_traits::HostEnvironment;
use std::sync::Arc;

/// Registers `host_property(name)` and `user_name()`.
///
/// Both return `()` when the host has no value.
pub(crate) fn register_host_functions(engine: &mut Engine, host: Arc<dyn HostEnvironment>) {
    let properties = Arc::clone(&host);
    engine.register_fn("host_property", move |name: &str| -> Dynamic {
        properties
            .property(name)
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT)
    });

    engine.register_fn("user_name", move || -> Dynamic {
        host.user_name().map(Dynamic::from).unwrap_or(Dynamic::UNIT)
    });
}
