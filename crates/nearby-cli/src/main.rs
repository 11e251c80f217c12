use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nearby_core::{bucket_catalogue, PlacesQuery};
use nearby_pipeline::{build_aggregator, build_offline_aggregator, Aggregator, NearbyConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nearby")]
#[command(about = "Find places near a point that are open now")]
struct Cli {
    /// Serve captured provider fixtures instead of calling live APIs.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one search and print the JSON response.
    Search {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        #[arg(long, default_value_t = 1_500)]
        radius: u32,
        /// Comma-separated category tokens, e.g. `coffee,park`.
        #[arg(long, value_delimiter = ',', required = true)]
        categories: Vec<String>,
        #[arg(long)]
        open_now: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        force_refresh: bool,
    },
    /// List category buckets with caps and thresholds.
    Categories,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn aggregator(config: &NearbyConfig, fixtures: Option<&Path>) -> Result<Aggregator> {
    match fixtures {
        Some(root) => build_offline_aggregator(config, root).context("building offline aggregator"),
        None => build_aggregator(config).context("building aggregator"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = NearbyConfig::from_env();

    match cli.command {
        Commands::Serve { bind } => {
            let aggregator = Arc::new(aggregator(&config, cli.fixtures.as_deref())?);
            let bind = bind.unwrap_or_else(|| config.bind_addr.clone());
            nearby_web::serve(&bind, aggregator).await?;
        }
        Commands::Search {
            lat,
            lng,
            radius,
            categories,
            open_now,
            limit,
            force_refresh,
        } => {
            let aggregator = aggregator(&config, cli.fixtures.as_deref())?;
            let query = PlacesQuery {
                open_now: open_now.then_some(true),
                limit,
                force_refresh,
                ..PlacesQuery::new(lat, lng, radius, categories)
            };
            let response = aggregator.search(query).await.context("invalid search")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Categories => {
            for bucket in bucket_catalogue() {
                println!("{:<16} cap={:<3} min={:<3} {}", bucket.key.as_str(), bucket.cap, bucket.minimum, bucket.label);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_args_accept_negative_longitude_and_category_list() {
        let cli = Cli::try_parse_from([
            "nearby", "search", "--lat", "42.33", "--lng", "-83.04", "--categories", "coffee,park", "--open-now",
        ])
        .unwrap();
        match cli.command {
            Commands::Search { lng, categories, open_now, radius, .. } => {
                assert_eq!(lng, -83.04);
                assert_eq!(categories, vec!["coffee", "park"]);
                assert!(open_now);
                assert_eq!(radius, 1_500);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn fixtures_flag_is_global() {
        let cli = Cli::try_parse_from(["nearby", "categories", "--fixtures", "fixtures"]).unwrap();
        assert_eq!(cli.fixtures, Some(PathBuf::from("fixtures")));
    }
}
