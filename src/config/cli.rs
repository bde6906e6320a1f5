use crate::core::Registry;
use clap::Parser;
use std::path::PathBuf;

/// Command line arguments. Options left unset fall back to the config file,
/// then to built-in defaults.
#[derive(Debug, Clone, Parser)]
#[command(name = "geofeed-finder")]
#[command(version)]
#[command(about = "Collects geofeed files referenced by registry allocations into one CSV")]
pub struct CliConfig {
    /// Output file
    #[arg(short = 'o', long = "output", default_value = "result.csv")]
    pub output_path: String,

    /// Check a single prefix through whois instead of scanning the registries
    #[arg(short = 't', long = "test", value_name = "PREFIX")]
    pub test_prefix: Option<String>,

    /// Do not log per-item errors
    #[arg(short, long)]
    pub silent: bool,

    /// Use the ARIN bulk whois archive (requires a configured dump URL)
    #[arg(short = 'b', long)]
    pub arin_bulk: bool,

    /// Keep postal codes in the output
    #[arg(short = 'z', long)]
    pub include_zip: bool,

    /// Keep rows with invalid ISO country or region codes
    #[arg(short = 'k', long)]
    pub keep_non_iso: bool,

    /// Per-download timeout in seconds [default: 10]
    #[arg(short = 'd', long, value_name = "SECONDS")]
    pub download_timeout: Option<u64>,

    /// Registries to scan
    #[arg(
        short = 'i',
        long,
        value_delimiter = ',',
        default_value = "ripe,apnic,lacnic,afrinic,arin"
    )]
    pub include: Vec<Registry>,

    /// TOML settings file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Cache directory [default: .cache]
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Downloads per batch [default: 5]
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Cache lifetime in days when a server sends no max-age [default: 7]
    #[arg(long)]
    pub cache_days: Option<i64>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU and memory usage after each phase")]
    pub monitor: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = CliConfig::parse_from(["geofeed-finder"]);
        assert_eq!(cli.output_path, "result.csv");
        assert_eq!(cli.include, Registry::ALL.to_vec());
        assert!(cli.test_prefix.is_none());
        assert!(cli.download_timeout.is_none());
        assert!(!cli.silent);
    }

    #[test]
    fn test_short_flags() {
        let cli = CliConfig::parse_from([
            "geofeed-finder",
            "-o",
            "out.csv",
            "-t",
            "192.0.2.0/24",
            "-s",
            "-z",
            "-k",
            "-d",
            "20",
            "-i",
            "RIPE,apnic",
        ]);
        assert_eq!(cli.output_path, "out.csv");
        assert_eq!(cli.test_prefix.as_deref(), Some("192.0.2.0/24"));
        assert!(cli.silent && cli.include_zip && cli.keep_non_iso);
        assert_eq!(cli.download_timeout, Some(20));
        assert_eq!(cli.include, vec![Registry::Ripe, Registry::Apnic]);
    }

    #[test]
    fn test_unknown_registry_is_rejected() {
        assert!(CliConfig::try_parse_from(["geofeed-finder", "-i", "iana"]).is_err());
    }
}
