//! Multi-rank render scenarios over the in-process cluster

mod common;

use common::builders::{database, image_space_settings, DomainBuilder};
use volvis_rs::config::{CompositingMode, PartitionMode, RenderSettings};
use volvis_rs::pipeline::filters::RenderStats;
use volvis_rs::pipeline::ExecutionContext;
use volvis_rs::render::{Communicator, Image, LocalCluster, View, VolumeRenderer};
use volvis_rs::types::DomainData;

const BACKGROUND: [u8; 3] = [0, 0, 0];

/// The single tetrahedron every scenario renders, in image coordinates.
fn scenario_tet() -> DomainData {
    DomainBuilder::new(0)
        .tet(
            [
                [10.0, 55.0, 1.0],
                [40.0, 55.0, 1.0],
                [10.0, 70.0, 1.0],
                [10.0, 55.0, 10.0],
            ],
            [0.2, 0.4, 0.6, 1.0],
        )
        .build()
}

/// Render on `ranks` ranks; rank 0 holds `data`, the others hold nothing.
fn render(
    ranks: usize,
    settings: &RenderSettings,
    data: impl Fn() -> Vec<DomainData> + Sync,
) -> Vec<(Option<Image>, RenderStats)> {
    LocalCluster::run(ranks, |comm| {
        let domains = if comm.rank() == 0 { data() } else { Vec::new() };
        let view = View::image_space(settings.width, settings.height, settings.depth_samples);
        let mut renderer =
            VolumeRenderer::new(settings.clone(), database(domains), Box::new(comm), view).unwrap();
        let image = renderer.render(&mut ExecutionContext::new()).unwrap();
        (image, renderer.stats().unwrap())
    })
}

#[test]
fn test_primitive_lands_on_strip_owner() {
    let settings = image_space_settings(100, 16);
    let results = render(4, &settings, || vec![scenario_tet()]);

    let received: Vec<usize> = results.iter().map(|(_, s)| s.primitives_received).collect();
    assert_eq!(received, vec![0, 0, 1, 0]);
    assert_eq!(results[2].1.rows, 50..75);
    assert_eq!(results[0].1.primitives_sent, 1);

    let image = results[0].0.as_ref().expect("root holds the image");
    assert!(results[1..].iter().all(|(img, _)| img.is_none()));

    let rows = image.rows_differing_from(BACKGROUND);
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| (50..75).contains(r)), "rows {:?}", rows);
    assert!(rows.iter().all(|r| (55..=70).contains(r)));
}

#[test]
fn test_image_independent_of_partition_and_rank_count() {
    let data = || {
        vec![
            scenario_tet(),
            DomainBuilder::new(1)
                .grid(4, [60.0, 10.0, 2.0], 32.0, |p| p.y / 50.0)
                .build(),
        ]
    };
    let uniform = image_space_settings(100, 16);
    let balanced = RenderSettings {
        partition: PartitionMode::Balanced,
        ..uniform.clone()
    };

    let reference = render(1, &uniform, data).remove(0).0.unwrap();
    assert!(!reference.rows_differing_from(BACKGROUND).is_empty());

    for settings in [&uniform, &balanced] {
        for ranks in [2, 3] {
            let image = render(ranks, settings, data).remove(0).0.unwrap();
            assert_eq!(image, reference, "{:?} on {} ranks", settings.partition, ranks);
        }
    }
}

#[test]
fn test_balanced_partition_splits_the_work() {
    let data = || {
        vec![DomainBuilder::new(0)
            .grid(6, [0.0, 40.0, 1.0], 20.0, |p| p.x)
            .build()]
    };
    let settings = RenderSettings {
        partition: PartitionMode::Balanced,
        ..image_space_settings(100, 32)
    };
    let results = render(4, &settings, data);

    // every strip gets some of the rows the grid covers
    for (_, stats) in &results {
        assert!(!stats.rows.is_empty(), "rank {} got no rows", stats.rank);
        assert!(stats.valid_samples > 0, "rank {} idle", stats.rank);
    }
    let mut covered: Vec<usize> = results.iter().flat_map(|(_, s)| s.rows.clone()).collect();
    covered.sort_unstable();
    assert_eq!(covered, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_all_gather_gives_every_rank_the_image() {
    let settings = RenderSettings {
        compositing: CompositingMode::AllGather,
        ..image_space_settings(100, 16)
    };
    let results = render(3, &settings, || vec![scenario_tet()]);
    let first = results[0].0.clone().unwrap();
    assert!(results.iter().all(|(img, _)| img.as_ref() == Some(&first)));
}

#[test]
fn test_gather_to_other_root() {
    let settings = RenderSettings {
        compositing: CompositingMode::GatherToRoot { root: 2 },
        ..image_space_settings(100, 16)
    };
    let results = render(3, &settings, || vec![scenario_tet()]);
    assert!(results[0].0.is_none() && results[1].0.is_none());
    assert!(results[2].0.is_some());
}
