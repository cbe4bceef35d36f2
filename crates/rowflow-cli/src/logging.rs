use tracing_subscriber::EnvFilter;

/// Crates whose events `--log-level` controls. Everything else stays at `warn`.
const ROWFLOW_TARGETS: [&str; 3] = ["rowflow_engine", "rowflow_types", "rowflow_cli"];

/// Filter directive for `--log-level`, scoped to the rowflow crates.
fn directive(log_level: &str) -> String {
    let mut directive = String::from("warn");
    for target in ROWFLOW_TARGETS {
        directive.push_str(&format!(",{target}={log_level}"));
    }
    directive
}

/// Install the stderr subscriber. `RUST_LOG` overrides `--log-level`.
///
/// Stdout is reserved for output rows.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive(log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_applies_to_rowflow_crates_only() {
        assert_eq!(
            directive("debug"),
            "warn,rowflow_engine=debug,rowflow_types=debug,rowflow_cli=debug"
        );
        assert!(EnvFilter::try_new(directive("trace")).is_ok());
    }

    #[test]
    fn bogus_level_is_rejected_by_filter() {
        assert!(EnvFilter::try_new(directive("loud!")).is_err());
    }
}
