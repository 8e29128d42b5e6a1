use crate::config::AppConfig;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

const FALLBACK_FILTER: &str = "info,rdkafka=warn,sqlx=warn";

pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = env_filter(&config.log_level);

    if config.is_production() {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_target(false)
            .try_init()
            .map_err(|err| anyhow::anyhow!("tracing init failed: {err}"))?;
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("tracing init failed: {err}"))?;
    }

    Ok(())
}

fn env_filter(directives: &str) -> EnvFilter {
    if directives.trim().is_empty() {
        return EnvFilter::new(FALLBACK_FILTER);
    }
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_level_uses_the_fallback_filter() {
        assert_eq!(env_filter("  ").to_string(), EnvFilter::new(FALLBACK_FILTER).to_string());
        assert_eq!(env_filter("debug").to_string(), "debug");
    }
}
