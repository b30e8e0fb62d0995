//! geoguessr - query the GeoGuessr web API from the terminal
//!
//! Requests go through the same cached, rate-limited dispatcher the library
//! exposes. Logs are written to stderr and filtered with `RUST_LOG`.

use std::process::ExitCode;

use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use geoguessr_client::activity::activity_feed;
use geoguessr_client::cli::{CacheCommand, Cli, Command};
use geoguessr_client::ApiContext;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Command, ctx: &ApiContext) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Get(args) => {
            let descriptor = args.to_descriptor()?;
            let body = ctx.dispatch_scoped(&descriptor).await?;
            println!("{}", body);
        }
        Command::Feed(args) => {
            let limit = args.limit.unwrap_or(usize::MAX);
            let feed = activity_feed(ctx.default_dispatcher(), args.per_page, args.friends).take(limit);
            let mut feed = std::pin::pin!(feed);
            while let Some(activity) = feed.next().await {
                println!("{}", serde_json::to_string(&activity?)?);
            }
        }
        Command::Cache(command) => {
            for store in [ctx.sync_store(), ctx.async_store()] {
                match command {
                    CacheCommand::List => {
                        for entry in store.entries()? {
                            let expires = entry
                                .expires_at
                                .map(|at| at.to_rfc3339())
                                .unwrap_or_else(|| "never".to_string());
                            println!("{}\t{}\t{}", entry.key, entry.status, expires);
                        }
                    }
                    CacheCommand::Sweep => {
                        let removed = store.delete_expired()?;
                        println!("{}: removed {} expired entries", store.root().display(), removed);
                    }
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let ctx = ApiContext::from_env();

    match run(cli.command, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
