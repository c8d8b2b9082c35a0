//! Shared setup for the BCM2711 measurement binaries.

use gadgetbench::BenchmarkResult;
use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print a result either as text or as a JSON object.
pub fn report(res: &BenchmarkResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&res.summary())?);
    } else {
        println!("{}", res);
    }
    Ok(())
}

/// Parse one encoded instruction word (`0x9ac808e6`, `0xd503_201f`, ...).
pub fn parse_word(s: &str) -> anyhow::Result<u32> {
    let word = gadgetbench::ir::parse_u64(s)?;
    Ok(u32::try_from(word)?)
}
