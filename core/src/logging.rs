/// Logging initialization.
///
/// Called once at the start of `ChatEngine::new`, before anything else.
/// `try_init` keeps this a no-op when the embedding application or a test
/// harness has already installed its own subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consulta_core=debug,info".into()),
        )
        .try_init();
}
