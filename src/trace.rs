#[cfg(feature = "trace")]
use std::sync::Once;

#[cfg(feature = "trace")]
static INIT: Once = Once::new();

/// Install a stderr tracing subscriber, once. Filter defaults to
/// `span_engine=debug` and honors `RUST_LOG`.
#[cfg(feature = "trace")]
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("span_engine=debug")),
            )
            .init();
    });
}
