//! Command-line interface parsing for the geoguessr client
//!
//! Parsing and the mapping from arguments to request descriptors live here so
//! they can be tested without touching the network; `main.rs` executes them.

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::activity::DEFAULT_FEED_PAGE_SIZE;
use crate::request::{Method, RequestDescriptor};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A `-p` argument without an `=`
    #[error("Invalid parameter: '{0}'. Expected key=value")]
    InvalidParam(String),

    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid expiry: {0} seconds is out of range")]
    InvalidExpiry(i64),
}

/// Caching, rate-limited access to the GeoGuessr web API
#[derive(Parser, Debug)]
#[command(name = "geoguessr")]
#[command(about = "Query the GeoGuessr web API through a local response cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Perform one request and print the raw response body
    ///
    /// Examples:
    ///   geoguessr get api/v3/profiles --auth
    ///   geoguessr get api/v3/search/map -p q=paris -p page=0
    Get(GetArgs),

    /// Print the activity feed, one JSON object per line
    Feed(FeedArgs),

    /// Inspect or clean the response cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(clap::Args, Debug)]
pub struct GetArgs {
    /// API path (resolved against the service origin) or absolute URL
    pub target: String,

    /// Query parameter, repeatable
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Send a POST instead of a GET
    #[arg(long)]
    pub post: bool,

    /// JSON request body
    #[arg(long, value_name = "BODY")]
    pub json: Option<String>,

    /// Attach the session cookie from the credential variable
    #[arg(long)]
    pub auth: bool,

    /// Skip the cache and always fetch live
    #[arg(long)]
    pub no_cache: bool,

    /// Custom cache lifetime in seconds
    #[arg(long, value_name = "SECS")]
    pub expiry: Option<i64>,
}

#[derive(clap::Args, Debug)]
pub struct FeedArgs {
    /// Show the friends feed instead of your own
    #[arg(long)]
    pub friends: bool,

    /// Entries requested per page
    #[arg(long, value_name = "N", default_value_t = DEFAULT_FEED_PAGE_SIZE)]
    pub per_page: usize,

    /// Stop after this many activities
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
    /// List stored entries with their expiry
    List,
    /// Delete expired entries
    Sweep,
}

/// Splits a `key=value` argument at the first `=`
pub fn parse_param_arg(s: &str) -> Result<(String, String), CliError> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(CliError::InvalidParam(s.to_string())),
    }
}

impl GetArgs {
    /// Builds the request descriptor these arguments describe
    pub fn to_descriptor(&self) -> Result<RequestDescriptor, CliError> {
        let method = if self.post { Method::Post } else { Method::Get };
        let mut descriptor = RequestDescriptor::new(method, self.target.clone())
            .needs_auth(self.auth)
            .do_not_cache(self.no_cache);

        for raw in &self.params {
            let (key, value) = parse_param_arg(raw)?;
            descriptor = descriptor.param(key, value);
        }
        if let Some(ref body) = self.json {
            descriptor = descriptor.json(serde_json::from_str(body)?);
        }
        if let Some(secs) = self.expiry {
            let ttl = chrono::Duration::try_seconds(secs).ok_or(CliError::InvalidExpiry(secs))?;
            descriptor = descriptor.expiry(ttl);
        }
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CachePolicy, ParamValue};

    fn get_args(argv: &[&str]) -> GetArgs {
        match Cli::parse_from(argv).command {
            Command::Get(args) => args,
            other => panic!("expected get, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_param_arg() {
        assert_eq!(
            parse_param_arg("q=paris").unwrap(),
            ("q".to_string(), "paris".to_string())
        );
        assert_eq!(
            parse_param_arg("filter=a=b").unwrap(),
            ("filter".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_param_arg("empty=").unwrap().1, "");
    }

    #[test]
    fn test_parse_param_arg_invalid() {
        let err = parse_param_arg("novalue").unwrap_err();
        assert!(err.to_string().contains("Invalid parameter"));
        assert!(err.to_string().contains("novalue"));
        assert!(parse_param_arg("=x").is_err());
    }

    #[test]
    fn test_get_defaults() {
        let descriptor = get_args(&["geoguessr", "get", "api/v3/profiles"])
            .to_descriptor()
            .unwrap();
        assert_eq!(descriptor.method, Method::Get);
        assert_eq!(descriptor.target, "api/v3/profiles");
        assert!(!descriptor.needs_auth);
        assert_eq!(descriptor.cache_policy(), CachePolicy::Default);
    }

    #[test]
    fn test_get_with_all_flags() {
        let descriptor = get_args(&[
            "geoguessr",
            "get",
            "api/v3/search/map",
            "-p",
            "q=paris",
            "--param",
            "page=2",
            "--post",
            "--json",
            "{\"a\": 1}",
            "--auth",
            "--expiry",
            "60",
        ])
        .to_descriptor()
        .unwrap();

        assert_eq!(descriptor.method, Method::Post);
        assert!(descriptor.needs_auth);
        assert_eq!(
            descriptor.params,
            vec![
                ("q".to_string(), ParamValue::from("paris")),
                ("page".to_string(), ParamValue::from("2"))
            ]
        );
        assert_eq!(descriptor.json, Some(serde_json::json!({"a": 1})));
        assert_eq!(
            descriptor.cache_policy(),
            CachePolicy::Expires(chrono::Duration::seconds(60))
        );
    }

    #[test]
    fn test_get_no_cache() {
        let descriptor = get_args(&["geoguessr", "get", "x", "--no-cache", "--expiry", "5"])
            .to_descriptor()
            .unwrap();
        assert_eq!(descriptor.cache_policy(), CachePolicy::Bypass);
    }

    #[test]
    fn test_get_invalid_json() {
        let result = get_args(&["geoguessr", "get", "x", "--json", "{nope"]).to_descriptor();
        assert!(matches!(result, Err(CliError::InvalidJson(_))));
    }

    #[test]
    fn test_get_out_of_range_expiry() {
        let result = get_args(&["geoguessr", "get", "x", "--expiry", "9223372036854775807"])
            .to_descriptor();
        assert!(matches!(result, Err(CliError::InvalidExpiry(9223372036854775807))));

        let result = get_args(&["geoguessr", "get", "x", "--expiry=-9223372036854775808"])
            .to_descriptor();
        assert!(matches!(result, Err(CliError::InvalidExpiry(_))));
    }

    #[test]
    fn test_feed_defaults() {
        match Cli::parse_from(["geoguessr", "feed"]).command {
            Command::Feed(args) => {
                assert!(!args.friends);
                assert_eq!(args.per_page, 50);
                assert!(args.limit.is_none());
            }
            other => panic!("expected feed, got {:?}", other),
        }
    }

    #[test]
    fn test_feed_flags() {
        match Cli::parse_from(["geoguessr", "feed", "--friends", "--per-page", "10", "--limit", "3"]).command {
            Command::Feed(args) => {
                assert!(args.friends);
                assert_eq!(args.per_page, 10);
                assert_eq!(args.limit, Some(3));
            }
            other => panic!("expected feed, got {:?}", other),
        }
    }

    #[test]
    fn test_cache_subcommands() {
        assert!(matches!(
            Cli::parse_from(["geoguessr", "cache", "list"]).command,
            Command::Cache(CacheCommand::List)
        ));
        assert!(matches!(
            Cli::parse_from(["geoguessr", "cache", "sweep"]).command,
            Command::Cache(CacheCommand::Sweep)
        ));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["geoguessr"]).is_err());
        assert!(Cli::try_parse_from(["geoguessr", "feed", "--per-page", "many"]).is_err());
    }
}
