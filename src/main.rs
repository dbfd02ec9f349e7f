//! VolVis-RS - Main Entry Point
//!
//! Renders a synthetic tetrahedral-hexahedral dataset on in-process ranks
//! and writes the composited image as a PPM.
//!
//! Usage: `volvis-rs [config.json|config.toml]`

use anyhow::Context;
use glam::DVec3;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use volvis_rs::{
    config::{LoggingConfig, VisConfig},
    pipeline::{filters::RenderStats, AbortHandle, ExecutionContext, MemoryDatabase},
    render::{Communicator, Image, LocalCluster, View, VolumeRenderer},
    types::{Bounds, Cell, Dataset, DomainData, UnstructuredMesh},
};

/// Hexahedra per axis of the synthetic grid
const GRID_CELLS: usize = 24;

/// Domains per rank in the synthetic decomposition
const DOMAINS_PER_RANK: usize = 2;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => VisConfig::load(path).with_context(|| format!("loading {:?}", path))?,
        None => VisConfig::default(),
    };

    let _log_guard = init_logging(&config.logging)?;
    tracing::info!(
        "Starting VolVis-RS: {}x{} on {} ranks ({})",
        config.render.width,
        config.render.height,
        config.ranks,
        config.render.ray_function
    );

    let ranks = config.ranks;
    let domains = ranks * DOMAINS_PER_RANK;
    let view = View::fit_bounds(
        &Bounds::unit(),
        config.render.width,
        config.render.height,
        config.render.depth_samples,
    );
    let abort = AbortHandle::new();

    let started = std::time::Instant::now();
    let results = LocalCluster::run(ranks, |comm| -> volvis_rs::Result<(Option<Image>, Option<RenderStats>)> {
        let rank = comm.rank();
        let dataset = synthetic_dataset((rank..domains).step_by(ranks), domains);
        let db = Arc::new(MemoryDatabase::from_dataset("mesh", dataset));
        let mut renderer = VolumeRenderer::new(config.render.clone(), db, Box::new(comm), view)?;
        let mut ctx = ExecutionContext::new().with_abort_handle(abort.clone());
        let image = renderer.render(&mut ctx)?;
        Ok((image, renderer.stats()))
    });
    tracing::info!("Rendered in {:.1?}", started.elapsed());

    let mut image = None;
    for result in results {
        let (rank_image, stats) = result.context("render failed")?;
        if let Some(stats) = stats {
            tracing::info!(
                "Rank {}: rows {:?}, sent {} primitives ({} bytes), kept {}, {} valid samples",
                stats.rank,
                stats.rows,
                stats.primitives_sent,
                stats.bytes_sent,
                stats.primitives_received,
                stats.valid_samples
            );
        }
        image = image.or(rank_image);
    }
    let image = image.context("no rank produced an image")?;

    let output = output_path(config_path.as_deref());
    std::fs::write(&output, image.to_ppm()).with_context(|| format!("writing {:?}", output))?;
    tracing::info!("Wrote {:?}", output);
    Ok(())
}

/// Console logging plus an optional daily log file. The returned guard
/// flushes the file writer on drop.
fn init_logging(
    logging: &LoggingConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_filter = logging.level.as_deref().unwrap_or("info,volvis_rs=debug");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "volvis.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

fn output_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(|p| p.with_extension("ppm"))
        .unwrap_or_else(|| PathBuf::from("volvis.ppm"))
}

/// Slabs of a hexahedral grid over the unit cube, split along z into
/// `total` domains. `density` is a Gaussian blob; the `material` variable
/// and the `left`/`right` cell tags split the cube at x = 0.5.
fn synthetic_dataset(domains: impl Iterator<Item = usize>, total: usize) -> Dataset {
    Dataset::new(
        domains
            .map(|d| synthetic_domain(d, total))
            .filter(|d| d.mesh.num_cells() > 0)
            .collect(),
    )
}

fn synthetic_domain(domain: usize, total: usize) -> DomainData {
    let n = GRID_CELLS;
    let z0 = domain * n / total;
    let z1 = (domain + 1) * n / total;
    let h = 1.0 / n as f64;

    let nz = z1 - z0 + 1;
    let index = |i: usize, j: usize, k: usize| ((k * (n + 1) + j) * (n + 1) + i) as u32;

    let mut points = Vec::with_capacity((n + 1) * (n + 1) * nz);
    for k in z0..=z1 {
        for j in 0..=n {
            for i in 0..=n {
                points.push(DVec3::new(i as f64 * h, j as f64 * h, k as f64 * h));
            }
        }
    }

    let mut cells = Vec::with_capacity(n * n * (z1 - z0));
    let mut tags = Vec::with_capacity(n * n * (z1 - z0));
    for k in 0..z1 - z0 {
        for j in 0..n {
            for i in 0..n {
                tags.push(if 2 * i < n { "left" } else { "right" });
                cells.push(Cell::hex([
                    index(i, j, k),
                    index(i + 1, j, k),
                    index(i + 1, j + 1, k),
                    index(i, j + 1, k),
                    index(i, j, k + 1),
                    index(i + 1, j, k + 1),
                    index(i + 1, j + 1, k + 1),
                    index(i, j + 1, k + 1),
                ]));
            }
        }
    }

    let center = DVec3::splat(0.5);
    let density = points
        .iter()
        .map(|p| (-(*p - center).length_squared() / 0.08).exp())
        .collect();
    let material = points
        .iter()
        .map(|p| if p.x < 0.5 { 1.0 } else { 2.0 })
        .collect();

    DomainData::new(domain as u32, UnstructuredMesh::new(points, cells))
        .with_var("density", density)
        .with_var("material", material)
        .with_materials(tags)
}
