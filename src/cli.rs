//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Workload authenticator - obtains and refreshes a broker access token
#[derive(Parser, Debug)]
#[command(name = "workload-authn")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTHN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AUTHN_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTHN_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Authenticate once and exit, regardless of container mode
    #[arg(long)]
    pub once: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = Cli::try_parse_from(["workload-authn"]).unwrap();
        assert_eq!(cli.log_level, "info");
        assert!(cli.config.is_none());
        assert!(!cli.once);
    }

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from([
            "workload-authn",
            "--config",
            "/etc/authn/authn.yaml",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--once",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/authn/authn.yaml")));
        assert_eq!(cli.log_level, "debug");
        assert_eq!(cli.log_format.as_deref(), Some("json"));
        assert!(cli.once);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
