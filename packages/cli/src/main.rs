#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the building review queue.
//!
//! `plan` prints the density estimate and query recommendation for an
//! area. `review` runs a queue session, printing each candidate as a JSON
//! line and marking it processed. Ctrl-C cancels in-flight gateway calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use building_queue_area_models::{AreaError, AreaSelection, BoundingBox, Coordinate};
use building_queue_density::{DensityCache, DensityEstimator};
use building_queue_gateway::memory::StaticGateway;
use building_queue_gateway::overpass::OverpassGateway;
use building_queue_gateway::service_registry::{
    ProviderConfig, all_services, default_service, find_service,
};
use building_queue_gateway::{CancelSignal, GatewayError, SpatialGateway};
use building_queue_gateway_models::BuildingRecord;
use building_queue_planner::QueryPlanner;
use building_queue_queue::CandidateQueue;
use building_queue_queue_models::{QueueEvent, QueueSettings, SettingsError};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Area(#[from] AreaError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown gateway service '{0}'")]
    UnknownService(String),
}

#[derive(Parser)]
#[command(name = "building_queue", about = "Plan and review building candidates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured gateway services
    Services,
    /// Estimate density and print the query plan for an area
    Plan {
        #[command(flatten)]
        area: AreaArgs,
        #[command(flatten)]
        gateway: GatewayArgs,
        /// Number of candidates wanted
        #[arg(long, default_value_t = 20)]
        count: usize,
    },
    /// Review candidates from an area, printing one JSON line each
    Review {
        #[command(flatten)]
        area: AreaArgs,
        #[command(flatten)]
        gateway: GatewayArgs,
        /// Stop after this many candidates
        #[arg(long, default_value_t = 20)]
        count: usize,
        /// Queue settings TOML file
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Skip buildings that already carry this tag (overrides settings)
        #[arg(long)]
        skip_tag: Option<String>,
    },
}

/// Either a circle (`--lat --lon --radius-m`) or a rectangle (`--bbox`).
#[derive(Args)]
struct AreaArgs {
    /// Center latitude
    #[arg(
        long,
        allow_hyphen_values = true,
        requires_all = ["lon", "radius_m"],
        conflicts_with = "bbox"
    )]
    lat: Option<f64>,
    /// Center longitude
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,
    /// Radius in meters
    #[arg(long, requires = "lat")]
    radius_m: Option<f64>,
    /// Rectangle as `min_lat,min_lon,max_lat,max_lon`
    #[arg(long, allow_hyphen_values = true)]
    bbox: Option<String>,
}

impl AreaArgs {
    fn selection(&self) -> Result<AreaSelection, CliError> {
        match (self.lat, self.lon, self.radius_m, self.bbox.as_deref()) {
            (Some(lat), Some(lon), Some(radius_m), None) => {
                Ok(AreaSelection::radius(Coordinate::new(lat, lon), radius_m)?)
            }
            (None, None, None, Some(bbox)) => Ok(AreaSelection::rectangle(parse_bbox(bbox)?)?),
            _ => Err(CliError::Usage(
                "specify either --lat, --lon and --radius-m, or --bbox".to_string(),
            )),
        }
    }
}

#[derive(Args)]
struct GatewayArgs {
    /// Serve buildings from a JSON file of records instead of Overpass
    #[arg(long)]
    fixture: Option<PathBuf>,
    /// Gateway service id (defaults to the highest-priority enabled one)
    #[arg(long, conflicts_with = "fixture")]
    service: Option<String>,
    /// Override the service's interpreter URL
    #[arg(long, env = "OVERPASS_URL")]
    overpass_url: Option<String>,
}

impl GatewayArgs {
    fn build(&self) -> Result<Arc<dyn SpatialGateway>, CliError> {
        if let Some(path) = &self.fixture {
            let buildings = load_fixture(path)?;
            log::info!(
                "Serving {} buildings from {}",
                buildings.len(),
                path.display()
            );
            return Ok(Arc::new(StaticGateway::new(buildings)));
        }

        let mut service = match &self.service {
            Some(id) => find_service(id)
                .cloned()
                .ok_or_else(|| CliError::UnknownService(id.clone()))?,
            None => default_service()
                .cloned()
                .ok_or_else(|| CliError::Usage("no enabled gateway services".to_string()))?,
        };

        if let Some(url) = &self.overpass_url {
            let ProviderConfig::Overpass { base_url, .. } = &mut service.provider;
            base_url.clone_from(url);
        }

        let gateway = OverpassGateway::from_service(&service)?;
        log::info!("Using {} ({})", service.name, gateway.base_url());
        Ok(Arc::new(gateway))
    }
}

fn parse_bbox(value: &str) -> Result<BoundingBox, CliError> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CliError::Usage(format!("invalid --bbox '{value}': {e}")))?;

    match parts.as_slice() {
        &[min_lat, min_lon, max_lat, max_lon] => {
            Ok(BoundingBox::new(min_lat, min_lon, max_lat, max_lon))
        }
        _ => Err(CliError::Usage(format!(
            "invalid --bbox '{value}': expected min_lat,min_lon,max_lat,max_lon"
        ))),
    }
}

fn load_fixture(path: &Path) -> Result<Vec<BuildingRecord>, CliError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn load_settings(path: Option<&Path>, skip_tag: Option<String>) -> Result<QueueSettings, CliError> {
    let mut settings = match path {
        Some(path) => QueueSettings::load(path)?,
        None => QueueSettings::default(),
    };
    if skip_tag.is_some() {
        settings.skip_existing_tag = skip_tag;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling outstanding queries");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Services => cmd_services(),
        Commands::Plan {
            area,
            gateway,
            count,
        } => cmd_plan(area.selection()?, gateway.build()?, count, &cancel).await?,
        Commands::Review {
            area,
            gateway,
            count,
            settings,
            skip_tag,
        } => {
            let settings = load_settings(settings.as_deref(), skip_tag)?;
            cmd_review(
                area.selection()?,
                gateway.build()?,
                settings,
                count,
                &cancel,
            )
            .await?;
        }
    }

    Ok(())
}

fn cmd_services() {
    for service in all_services() {
        println!(
            "{:<24} {:<8} priority {:<3} {}",
            service.id,
            if service.enabled { "enabled" } else { "disabled" },
            service.priority,
            service.base_url(),
        );
    }
}

async fn cmd_plan(
    area: AreaSelection,
    gateway: Arc<dyn SpatialGateway>,
    count: usize,
    cancel: &CancelSignal,
) -> Result<(), CliError> {
    let estimator = DensityEstimator::new(gateway, Arc::new(DensityCache::new()));
    let planner = QueryPlanner::new(estimator);

    let recommendation = planner.recommend(&area, count, cancel).await;
    println!("{}", serde_json::to_string_pretty(&recommendation)?);

    Ok(())
}

async fn cmd_review(
    area: AreaSelection,
    gateway: Arc<dyn SpatialGateway>,
    settings: QueueSettings,
    count: usize,
    cancel: &CancelSignal,
) -> Result<(), CliError> {
    let mut queue = CandidateQueue::with_gateway(gateway, settings);
    tokio::spawn(log_events(queue.subscribe()));

    if !queue.initialize(area, cancel).await {
        log::warn!("No buildings to review in {area}");
        return Ok(());
    }

    let mut reviewed = 0;
    while reviewed < count && !cancel.is_cancelled() {
        let Some(candidate) = queue.next(cancel).await else {
            log::info!("No more buildings in {area}");
            break;
        };
        println!("{}", serde_json::to_string(&candidate)?);
        queue.mark_processed(candidate.source_id);
        reviewed += 1;
    }

    log::info!(
        "Reviewed {reviewed} buildings, {} still queued",
        queue.size()
    );
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<QueueEvent>) {
    loop {
        match events.recv().await {
            Ok(QueueEvent::RunningLow { remaining }) => {
                log::info!("Queue running low ({remaining} left)");
            }
            Ok(QueueEvent::Processed {
                id,
                total_processed,
                ..
            }) => log::debug!("Processed {id} ({total_processed} total)"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Missed {skipped} queue events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_bbox() {
        let bounds = parse_bbox("52.50, 13.30,52.55,13.45").unwrap();
        assert_eq!(bounds, BoundingBox::new(52.50, 13.30, 52.55, 13.45));
    }

    #[test]
    fn rejects_short_bbox() {
        assert!(matches!(parse_bbox("1,2,3"), Err(CliError::Usage(_))));
        assert!(matches!(parse_bbox("1,2,x,4"), Err(CliError::Usage(_))));
    }

    #[test]
    fn radius_args_build_a_radius_selection() {
        let cli = Cli::try_parse_from([
            "building_queue",
            "plan",
            "--lat",
            "52.52",
            "--lon",
            "-13.4",
            "--radius-m",
            "750",
        ])
        .unwrap();
        let Commands::Plan { area, .. } = cli.command else {
            panic!("expected plan");
        };
        let selection = area.selection().unwrap();
        assert!(selection.is_radius());
        assert_eq!(selection.center(), Coordinate::new(52.52, -13.4));
    }

    #[test]
    fn bbox_and_radius_conflict() {
        let result = Cli::try_parse_from([
            "building_queue",
            "plan",
            "--lat",
            "1",
            "--lon",
            "1",
            "--radius-m",
            "10",
            "--bbox",
            "0,0,1,1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn missing_area_is_a_usage_error() {
        let area = AreaArgs {
            lat: None,
            lon: None,
            radius_m: None,
            bbox: None,
        };
        assert!(matches!(area.selection(), Err(CliError::Usage(_))));
    }

    #[test]
    fn inverted_bbox_is_rejected() {
        let area = AreaArgs {
            lat: None,
            lon: None,
            radius_m: None,
            bbox: Some("1,1,0,0".to_string()),
        };
        assert!(matches!(area.selection(), Err(CliError::Area(_))));
    }

    #[test]
    fn skip_tag_overrides_settings() {
        let settings = load_settings(None, Some("roof:shape".to_string())).unwrap();
        assert_eq!(settings.skip_existing_tag.as_deref(), Some("roof:shape"));
        assert_eq!(settings.capacity, 20);
    }
}
