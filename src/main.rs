//! API Version Lifecycle - CLI Entry Point

use anyhow::Result;
use api_version_lifecycle::router::no_routes;
use api_version_lifecycle::versioning::VersionReport;
use api_version_lifecycle::{
    ApiRequest, ApiVersioning, ApiVersioningConfig, MemoryRouter, SystemClock,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "api-version-lifecycle",
    about = "API version lifecycle management: status, validation and resolution checks",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "api-versions.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Resolve a request URI (path and query) and print the outcome
    #[arg(long, value_name = "URI")]
    resolve: Option<String>,

    /// Request header for --resolve, as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Usage window for the status report, in days
    #[arg(long, default_value = "30")]
    days: u32,

    /// Print the status report as JSON
    #[arg(long)]
    json: bool,

    /// Print Prometheus metrics after the report
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        ApiVersioningConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration");
        ApiVersioningConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    let print_metrics = args.metrics && config.metrics.enabled;
    let api = ApiVersioning::new(config, Arc::new(MemoryRouter::new()), Arc::new(SystemClock))?;
    api.load_versions(|_| no_routes())?;

    if let Some(uri) = &args.resolve {
        resolve(&api, uri, &args.headers)?;
    } else {
        let report = api.status_report(args.days).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_table(&report);
        }
    }

    if print_metrics {
        print!("{}", api.metrics().encode());
    }

    Ok(())
}

fn resolve(api: &ApiVersioning, uri: &str, headers: &[String]) -> Result<()> {
    let mut request = ApiRequest::get(uri);
    for header in headers {
        let Some((name, value)) = header.split_once(':') else {
            anyhow::bail!("Invalid header '{}', expected NAME:VALUE", header);
        };
        request = request.with_header(name.trim(), value.trim());
    }

    match api.admit(&request) {
        Ok(admission) => {
            let version = &admission.resolved.definition;
            println!(
                "{} -> {}{}",
                uri,
                version.name(),
                if admission.resolved.was_fallback {
                    " (fallback)"
                } else {
                    ""
                }
            );
            for (name, value) in api
                .headers()
                .for_version(version, Some(&request), api.registry().now())
            {
                println!("  {}: {}", name, value);
            }
        }
        Err(e) => {
            let response = api.error_response(&e, &request);
            println!("{} -> {} {}", uri, response.status(), e);
            println!("{}", response.body());
        }
    }

    Ok(())
}

fn print_table(report: &[VersionReport]) {
    println!(
        "{:<10} {:<12} {:<12} {:<12} {:<10} {:>10} {:>8}",
        "Version", "Status", "Deprecated", "Sunset", "Successor", "Requests", "Usage"
    );

    for row in report {
        let date = |d: Option<chrono::DateTime<chrono::Utc>>| {
            d.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "{:<10} {:<12} {:<12} {:<12} {:<10} {:>10} {:>7.1}%",
            row.name,
            row.status.label(),
            date(row.deprecation_date),
            date(row.sunset_date),
            row.successor.as_deref().unwrap_or("-"),
            row.requests,
            row.usage_percent
        );

        if row.sunset_soon {
            warn!(
                version = %row.name,
                days = row.days_until_sunset.unwrap_or_default(),
                "Version will be sunset soon"
            );
        }
    }
}
