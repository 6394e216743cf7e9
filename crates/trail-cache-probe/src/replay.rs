//! Headless viewport replay
//!
//! Applies each viewport in order, waits for the cache to settle and then runs the
//! closest-entity probes against the finest tier active at the last zoom.

use crate::ProbeError;
use crate::settings::{Probe, ReplayArgs};
use geo::Coord;
use serde::Serialize;
use trail_cache_lib::{
    Coverer, DirectoryTransport, EntityKey, EntityStore, GridCoverer, PinRequest, SchedulerStats,
    Tier, Transport, ViewportFetchScheduler, utils,
};

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub zoom: f64,
    pub elapsed_ms: f64,
    /// Loaded cells per tier, in tier order
    pub loaded_cells: [usize; 3],
    pub visible_entities: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub lat: f64,
    pub lng: f64,
    pub tier: String,
    pub kind: Option<&'static str>,
    pub id: Option<u64>,
    pub name: Option<String>,
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub stats: SchedulerStats,
    pub steps: Vec<StepReport>,
    pub paths: usize,
    pub trails: usize,
    pub pin: Option<PinRequest>,
    pub probes: Vec<ProbeReport>,
}

pub async fn run(args: &ReplayArgs) -> Result<Report, ProbeError> {
    let coverer = GridCoverer::new(!args.no_ancestors);
    let report = match (&args.data_dir, &args.server) {
        (Some(dir), _) => replay(args, DirectoryTransport::new(dir), coverer).await?,
        #[cfg(feature = "http")]
        (None, Some(url)) => replay(args, trail_cache_lib::HttpTransport::new(url), coverer).await?,
        #[cfg(not(feature = "http"))]
        (None, Some(_)) => {
            return Err(ProbeError::InvalidArgument(
                "--server requires the `http` feature".to_owned(),
            ));
        }
        (None, None) => {
            return Err(ProbeError::InvalidArgument(
                "one of --data-dir or --server is required".to_owned(),
            ));
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for probe in &report.probes {
            match (probe.kind, probe.id) {
                (Some(kind), Some(id)) => println!(
                    "{:.5},{:.5}: {kind} {id} {} at {:.6}",
                    probe.lat,
                    probe.lng,
                    probe.name.as_deref().unwrap_or(""),
                    probe.distance.unwrap_or_default()
                ),
                _ => println!("{:.5},{:.5}: nothing in range", probe.lat, probe.lng),
            }
        }
    }
    Ok(report)
}

pub async fn replay<T: Transport, C: Coverer>(
    args: &ReplayArgs,
    transport: T,
    coverer: C,
) -> Result<Report, ProbeError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("replay::replay");

    let config = args.cache_config();
    let mut store = EntityStore::with_config(config.clone());
    let mut scheduler = ViewportFetchScheduler::new(config, transport, coverer)?;

    let pin = args.pin.map(|entity_id| PinRequest {
        entity_id,
        precise: args.precise,
    });
    scheduler.set_pin(pin, &mut store);

    let mut steps = Vec::with_capacity(args.viewports.len());
    for viewport in &args.viewports {
        let start = instant::Instant::now();
        scheduler.update_viewport(*viewport, &mut store);
        scheduler.settle(&mut store).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let tier = store.active_tier(viewport.zoom);
        let step = StepReport {
            zoom: viewport.zoom,
            elapsed_ms,
            loaded_cells: Tier::ALL.map(|tier| scheduler.loaded_count(tier)),
            visible_entities: store.query_viewport(tier, viewport).len(),
        };
        tracing::info!(
            zoom = step.zoom,
            elapsed_ms = step.elapsed_ms,
            overview = step.loaded_cells[0],
            coarse = step.loaded_cells[1],
            fine = step.loaded_cells[2],
            visible = step.visible_entities,
            "Viewport settled"
        );
        steps.push(step);
    }

    let zoom = args.viewports.last().map(|v| v.zoom).unwrap_or_default();
    let tier = store.active_tier(zoom);
    let probes = args
        .probes
        .iter()
        .map(|probe| run_probe(&store, tier, probe))
        .collect();

    let stats = scheduler.stats();
    tracing::info!(
        fetches = stats.fetches_started,
        loads = stats.loads,
        empty = stats.empty_loads,
        failures = stats.failures,
        cancellations = stats.cancellations,
        unloads = stats.unloads,
        "Replay finished"
    );

    Ok(Report {
        stats,
        steps,
        paths: store.path_count(),
        trails: store.trail_count(),
        pin,
        probes,
    })
}

fn run_probe(store: &EntityStore, tier: Tier, probe: &Probe) -> ProbeReport {
    let point = utils::project_lat_lng(probe.lat, probe.lng);
    // Longitude maps linearly onto the plane, so degrees convert by a constant factor
    let radius = probe.radius_degrees / 180.0;
    let hit = store.query_closest(tier, Coord { x: point.x(), y: point.y() }, radius);

    let mut report = ProbeReport {
        lat: probe.lat,
        lng: probe.lng,
        tier: tier.to_string(),
        kind: None,
        id: None,
        name: None,
        distance: None,
    };
    if let Some(hit) = hit {
        report.distance = Some(hit.distance);
        match hit.key {
            EntityKey::Path(id) => {
                report.kind = Some("path");
                report.id = Some(id);
                report.name = store
                    .list_trails_on_path(id)
                    .first()
                    .map(|trail| trail.name.clone());
            }
            EntityKey::Trail(id) => {
                report.kind = Some("trail");
                report.id = Some(id);
                report.name = store.get_trail(id).map(|trail| trail.name.clone());
            }
        }
    }
    tracing::debug!(lat = probe.lat, lng = probe.lng, kind = ?report.kind, id = ?report.id, "Probe");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{GenerateArgs, parse_probe, parse_viewport};

    fn replay_args(dir: &std::path::Path, viewports: &[&str], probes: &[&str]) -> ReplayArgs {
        ReplayArgs {
            data_dir: Some(dir.to_path_buf()),
            server: None,
            viewports: viewports.iter().map(|v| parse_viewport(v).unwrap()).collect(),
            pin: None,
            precise: false,
            probes: probes.iter().map(|p| parse_probe(p).unwrap()).collect(),
            max_in_flight: 4,
            no_ancestors: false,
            json: false,
        }
    }

    async fn generated(dir: &std::path::Path) {
        crate::generate::run(&GenerateArgs {
            out: dir.to_path_buf(),
            trails: 40,
            seed: 11,
            center: (46.8, 8.2),
            spread: 0.05,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_replay_loads_generated_trails() {
        let dir = tempfile::tempdir().unwrap();
        generated(dir.path()).await;

        let args = replay_args(dir.path(), &["46.6,8.0,47.0,8.4,13"], &[]);
        let report = run(&args).await.unwrap();

        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.stats.failures, 0);
        assert!(report.stats.loads > 0);
        assert_eq!(report.trails, 40);
        assert_eq!(report.paths, 40);
        assert!(report.steps[0].loaded_cells[Tier::Fine.index()] > 0);
    }

    #[tokio::test]
    async fn test_probe_finds_pinned_trail_marker() {
        let dir = tempfile::tempdir().unwrap();
        generated(dir.path()).await;

        // Far away viewport: only the pin contributes fine-tier entities
        let mut args = replay_args(dir.path(), &["-10.0,-60.0,-9.9,-59.9,14"], &[]);
        args.pin = Some(5);
        let report = replay(&args, DirectoryTransport::new(dir.path()), GridCoverer::default())
            .await
            .unwrap();
        assert_eq!(report.trails, 1);
        assert_eq!(report.paths, 1);
        assert_eq!(report.pin.map(|pin| pin.entity_id), Some(5));
    }

    #[tokio::test]
    async fn test_missing_source_is_rejected() {
        let mut args = replay_args(std::path::Path::new("/nonexistent"), &["0,0,1,1,3"], &[]);
        args.data_dir = None;
        assert!(matches!(run(&args).await, Err(ProbeError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_probe_without_entities_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let args = replay_args(dir.path(), &["46.6,8.0,47.0,8.4,13"], &["46.8,8.2,0.01"]);
        let report = run(&args).await.unwrap();
        assert_eq!(report.probes.len(), 1);
        assert_eq!(report.probes[0].kind, None);
        assert_eq!(report.probes[0].tier, "fine");
    }
}
