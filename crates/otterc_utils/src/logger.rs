use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise the tracing subscriber once per process.
///
/// `RUST_LOG` wins when set; otherwise only the eval subsystem logs at `info`.
pub fn init_logging() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("otter_eval=info,otterc=info"));

        // Writes go to stderr so stdout stays free for program output and bytecode.
        let _ = fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    });
}
