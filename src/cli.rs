use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "read-status")]
#[command(version)]
#[command(about = "Live read/unread status of your collaboration spaces")]
pub struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Bearer token for the collaboration service
    #[arg(long, env = "READ_STATUS_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Base URL of the REST API
    #[arg(long)]
    pub api_url: Option<String>,

    /// URL of the real-time event stream
    #[arg(long)]
    pub events_url: Option<String>,

    /// Size of the first, fast page of spaces
    #[arg(long)]
    pub initial_fetch: Option<usize>,

    /// tracing filter directive (RUST_LOG takes precedence)
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,

    /// Read commands from stdin; a line with `r` marks the last message as read
    #[arg(long)]
    pub mark_read: bool,
}

impl Args {
    /// Overlay every flag that was given onto `config`.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(token) = &self.access_token {
            config.access_token = Some(token.clone());
        }
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(url) = &self.events_url {
            config.events_url = url.clone();
        }
        if let Some(n) = self.initial_fetch {
            config.initial_fetch = n;
        }
        if let Some(filter) = &self.log_filter {
            config.log_filter = filter.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["read-status"]);
        assert!(args.config.is_none());
        assert!(args.api_url.is_none());
        assert!(args.initial_fetch.is_none());
        assert!(!args.no_color);
        assert!(!args.mark_read);
    }

    #[test]
    fn test_args_parse_overrides() {
        let args = Args::parse_from([
            "read-status",
            "--config",
            "rs.toml",
            "--api-url",
            "http://localhost:9000",
            "--initial-fetch",
            "5",
            "--no-color",
            "--mark-read",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("rs.toml")));
        assert_eq!(args.initial_fetch, Some(5));
        assert!(args.no_color);
        assert!(args.mark_read);
    }

    #[test]
    fn test_apply_to_only_touches_given_flags() {
        let args = Args::parse_from(["read-status", "--events-url", "ws://localhost:9001", "--access-token", "t"]);
        let mut config = Config::default();
        args.apply_to(&mut config);
        assert_eq!(config.events_url, "ws://localhost:9001");
        assert_eq!(config.access_token.as_deref(), Some("t"));
        assert_eq!(config.api_url, Config::default().api_url);
        assert_eq!(config.initial_fetch, 30);
    }

    #[test]
    fn test_initial_fetch_rejects_non_numeric() {
        assert!(Args::try_parse_from(["read-status", "--initial-fetch", "many"]).is_err());
    }
}
