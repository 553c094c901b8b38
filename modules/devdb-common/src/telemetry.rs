use anyhow::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "devdb=info";

/// Initialize logging. A non-empty, valid `RUST_LOG` replaces the default
/// `devdb=info` directive entirely.
pub fn init_tracing(json: bool) -> Result<()> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().try_init().map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;
    }
    Ok(())
}

fn build_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| match EnvFilter::try_new(raw) {
            Ok(filter) => Some(filter),
            Err(e) => {
                eprintln!("ignoring invalid RUST_LOG {raw:?}: {e}");
                None
            }
        })
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_when_unset_or_empty() {
        assert_eq!(build_filter(None).to_string(), "devdb=info");
        assert_eq!(build_filter(Some("  ")).to_string(), "devdb=info");
    }

    #[test]
    fn rust_log_wins_for_the_same_target() {
        assert_eq!(build_filter(Some("devdb=debug")).to_string(), "devdb=debug");
        let mixed = build_filter(Some("warn,devdb_migrate=trace")).to_string();
        assert!(mixed.contains("devdb_migrate=trace"), "{mixed}");
        assert!(!mixed.contains("devdb=info"), "{mixed}");
    }

    #[test]
    fn invalid_rust_log_falls_back() {
        assert_eq!(build_filter(Some("devdb=loud")).to_string(), "devdb=info");
    }
}
