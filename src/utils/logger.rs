use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target used for per-item failures (fetch errors, rejected rows).
/// `--silent` turns this target off.
pub const ERRORS_TARGET: &str = "geofeed_finder::errors";

fn default_directives(verbose: bool, silent: bool) -> String {
    let mut directives = if verbose {
        "geofeed_finder=debug,info".to_string()
    } else {
        "geofeed_finder=info".to_string()
    };
    if silent {
        directives.push_str(&format!(",{}=off", ERRORS_TARGET));
    }
    directives
}

pub fn init_cli_logger(verbose: bool, silent: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, silent)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_disables_error_target() {
        assert_eq!(
            default_directives(false, true),
            "geofeed_finder=info,geofeed_finder::errors=off"
        );
        assert_eq!(default_directives(true, false), "geofeed_finder=debug,info");
    }
}
