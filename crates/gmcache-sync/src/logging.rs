use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "gmcache_sync=info,gmcache_store=info,warn";

/// Install a global `fmt` subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    init_with_default(DEFAULT_FILTER);
}

pub fn init_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt().with_env_filter(filter).try_init();
}
