//! Synthetic dataset generation
//!
//! Trails are random walks around a center. Each trail lands in the overview tier when it is
//! long, in the coarse tier always, and in the fine tier together with its path geometry. A
//! pin payload is written for every trail as well.

use crate::ProbeError;
use crate::settings::GenerateArgs;
use geo::Coord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use trail_cache_lib::{
    CacheConfig, CellContent, DirectoryTransport, FetchRequest, GridCoverer, Path, Tier,
    Trail, encode_cell, utils,
};

/// Trails longer than this also appear in the overview tier
const OVERVIEW_MIN_LENGTH_METERS: f32 = 5_000.0;

const TRAIL_NAMES: [&str; 8] = [
    "Ridge", "Lakeside", "Forest", "Summit", "Valley", "Canyon", "Meadow", "Glacier",
];

/// Summary of a generated dataset
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerateSummary {
    pub trails: usize,
    pub files: usize,
}

pub async fn run(args: &GenerateArgs) -> Result<GenerateSummary, ProbeError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("generate::run");

    let config = CacheConfig::default();
    let coverer = GridCoverer::default();
    let transport = DirectoryTransport::new(&args.out);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut cells: HashMap<FetchRequest, CellContent> = HashMap::new();
    let mut pins: Vec<(FetchRequest, CellContent)> = Vec::new();

    for index in 0..args.trails {
        let (path, trail, start) = random_trail(&mut rng, args, index as u64);
        let path = Arc::new(path);
        let trail = Arc::new(trail);

        for tier in Tier::ALL {
            if tier == Tier::Overview && trail.length_meters < OVERVIEW_MIN_LENGTH_METERS {
                continue;
            }
            let cell = coverer.cell_at(start.0, start.1, config.tier(tier).level);
            let content = cells.entry(FetchRequest::Cell { tier, cell }).or_default();
            if tier == Tier::Fine {
                content.paths.push(path.clone());
            }
            content.trails.push(trail.clone());
        }

        pins.push((
            FetchRequest::Pin {
                entity_id: trail.id,
                precise: false,
            },
            CellContent {
                paths: vec![path],
                trails: vec![trail],
            },
        ));
    }

    let mut summary = GenerateSummary {
        trails: args.trails,
        files: 0,
    };
    for (request, content) in cells.iter().chain(pins.iter().map(|(r, c)| (r, c))) {
        let file = transport.file_for(request);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, encode_cell(content)).await?;
        tracing::trace!(file = %file.display(), "Wrote payload");
        summary.files += 1;
    }

    tracing::info!(
        out = %args.out.display(),
        trails = summary.trails,
        files = summary.files,
        "Dataset generated"
    );
    Ok(summary)
}

/// A random walk starting near the configured center, returned with its start (lat, lng)
fn random_trail(rng: &mut StdRng, args: &GenerateArgs, index: u64) -> (Path, Trail, (f64, f64)) {
    let (center_lat, center_lng) = args.center;
    let spread = args.spread.abs().max(1e-6);
    let mut lat = center_lat + rng.gen_range(-spread..spread);
    let mut lng = center_lng + rng.gen_range(-spread..spread);
    let start = (lat, lng);

    let steps = rng.gen_range(4..40);
    let mut vertices = Vec::with_capacity(steps * 2);
    let mut length_meters = 0.0f64;
    for _ in 0..steps {
        let point = utils::project_lat_lng(lat, lng);
        vertices.push(point.x() as f32);
        vertices.push(point.y() as f32);

        let d_lat = rng.gen_range(-0.004..0.004);
        let d_lng = rng.gen_range(-0.004..0.004);
        length_meters += haversine_meters(lat, lng, lat + d_lat, lng + d_lng);
        lat += d_lat;
        lng += d_lng;
    }

    // Paths take even ids so bit 0 stays free for the direction flag
    let path_id = (index + 1) * 2;
    let reversed = rng.gen_bool(0.5);
    let path = Path::new(path_id, rng.gen_range(0..4), vertices);
    let marker = utils::project_lat_lng(start.0, start.1);
    let trail = Trail {
        id: index + 1,
        name: format!(
            "{} Trail {}",
            TRAIL_NAMES[rng.gen_range(0..TRAIL_NAMES.len())],
            index + 1
        ),
        trail_type: rng.gen_range(0..3),
        path_refs: [(path_id | reversed as u64) as i64].into_iter().collect(),
        marker: Coord {
            x: marker.x(),
            y: marker.y(),
        },
        // Scaled so a share of trails clears the overview threshold
        length_meters: (length_meters * 30.0) as f32,
    };
    (path, trail, start)
}

/// Great-circle distance in meters
fn haversine_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trail_cache_lib::decode_cell;

    fn args(out: &std::path::Path) -> GenerateArgs {
        GenerateArgs {
            out: out.to_path_buf(),
            trails: 25,
            seed: 3,
            center: (46.8, 8.2),
            spread: 0.2,
        }
    }

    #[test]
    fn test_haversine_one_degree() {
        let meters = haversine_meters(0.0, 0.0, 1.0, 0.0);
        assert!((meters - 111_195.0).abs() < 100.0);
    }

    #[tokio::test]
    async fn test_generate_writes_decodable_cells() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&args(dir.path())).await.unwrap();
        assert_eq!(summary.trails, 25);
        assert!(summary.files > 25);

        let transport = DirectoryTransport::new(dir.path());
        let pin = std::fs::read(transport.file_for(&FetchRequest::Pin {
            entity_id: 1,
            precise: false,
        }))
        .unwrap();
        let content = decode_cell(&pin).unwrap().unwrap();
        assert_eq!(content.trails[0].id, 1);
        assert_eq!(
            content.trails[0].path_ids().collect::<Vec<_>>(),
            vec![content.paths[0].id]
        );

        let fine_dir = dir.path().join(Tier::Fine.name());
        assert!(std::fs::read_dir(fine_dir).unwrap().count() > 0);
    }

    #[tokio::test]
    async fn test_generate_is_deterministic() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        run(&args(first.path())).await.unwrap();
        run(&args(second.path())).await.unwrap();

        let file = DirectoryTransport::new(first.path()).file_for(&FetchRequest::Pin {
            entity_id: 7,
            precise: false,
        });
        let relative = file.strip_prefix(first.path()).unwrap();
        assert_eq!(
            std::fs::read(&file).unwrap(),
            std::fs::read(second.path().join(relative)).unwrap()
        );
    }
}
