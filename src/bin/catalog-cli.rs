use clap::{Parser, Subcommand};
use catalog_sdk::{CatalogClient, ClientError};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "catalog-cli")]
#[command(about = "Command-line client for the catalog API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "CATALOG_URL")]
    url: String,

    /// W3C traceparent to continue an existing trace.
    #[arg(long)]
    traceparent: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service health
    Health,
    /// List the most recent products
    List,
    /// Fetch one product
    Get { id: i64 },
    /// Create a product
    Create { name: String, price: f64 },
    /// Call the slow endpoint
    Slow,
    /// Call the endpoint that always fails
    Error,
    /// Dump the metric registry snapshot
    Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut client = CatalogClient::new(&cli.url);
    if let Some(traceparent) = &cli.traceparent {
        client = client.with_traceparent(traceparent);
    }

    match cli.command {
        Commands::Health => print_json(&client.health().await),
        Commands::List => print_json(&client.list_products().await),
        Commands::Get { id } => match client.get_product(id).await {
            Ok(None) => {
                eprintln!("Product {} not found", id);
                Ok(())
            }
            Ok(Some(product)) => print_json(&Ok(product)),
            Err(e) => print_json::<()>(&Err(e)),
        },
        Commands::Create { name, price } => print_json(
            &client
                .create_product(&name, price)
                .await
                .map(|created| created.product),
        ),
        Commands::Slow => print_json(&client.slow().await),
        Commands::Error => print_json(&client.trigger_error().await),
        Commands::Metrics => print_json(&client.telemetry_metrics().await),
    }
}

fn print_json<T: Serialize>(result: &Result<T, ClientError>) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
