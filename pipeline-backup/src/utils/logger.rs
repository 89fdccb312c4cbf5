//! Run logging: one tracing subscriber per process, writing to stderr.
//!
//! Level resolution is `RUST_LOG`, then `--log-level` / `[log] level`, then
//! `info`. Executor spans (`version`, `date`) prefix every event of a run.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = run_filter(std::env::var("RUST_LOG").ok().as_deref(), level);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    Ok(())
}

fn run_filter(env: Option<&str>, level: &str) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
