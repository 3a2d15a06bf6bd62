use anyhow::{Context, bail};
use poly_sweep::{SweepConfig, run_sweep};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SweepConfig::default();
    let report = run_sweep(&config).context("sweep aborted")?;

    if !report.is_success() {
        bail!(
            "{} of {} configurations failed",
            report.failures.len(),
            config.configuration_count()
        );
    }
    Ok(())
}
