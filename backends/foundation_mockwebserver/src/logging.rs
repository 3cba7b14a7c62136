use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_DIRECTIVE: &str = "info";

/// Installs a formatting subscriber filtered by `RUST_LOG`, `info` when
/// unset or invalid. Returns false when a global subscriber already exists,
/// which leaves that subscriber in place.
pub fn init() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        assert!(!init());
    }
}
