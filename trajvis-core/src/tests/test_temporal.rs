use crate::data::Matrix;
use crate::fuzzy::{GraphConfig, NeighborGraphBuilder};
use crate::knn::KnnConfig;
use crate::temporal::{
    EpochStack, TemporalConfig, TemporalGraphBuilder, TemporalPolicy, neighbor_preserving_rate,
};
use crate::tests::init;
use crate::tests::test_data::{drifting, two_clusters, uniform};

fn spatial_graphs(snapshots: &[Matrix]) -> Vec<crate::fuzzy::FuzzyGraph> {
    let builder = NeighborGraphBuilder::new(GraphConfig {
        n_neighbors: 6,
        ..GraphConfig::default()
    });
    snapshots.iter().map(|s| builder.build(s)).collect()
}

#[test]
fn test_epoch_stack_locate() {
    init();
    let stack = EpochStack::new(vec![3, 5, 2]);
    assert_eq!(stack.total(), 10);
    assert_eq!(stack.offsets, vec![0, 3, 8]);
    assert_eq!(stack.locate(0), (0, 0));
    assert_eq!(stack.locate(3), (1, 0));
    assert_eq!(stack.locate(7), (1, 4));
    assert_eq!(stack.locate(9), (2, 1));
}

#[test]
fn test_local_policy_links_only_fibers() {
    init();
    let base = uniform(20, 4, 21);
    let snapshots = drifting(&base, 3, 0.01, 22);
    let graphs = spatial_graphs(&snapshots);

    let builder = TemporalGraphBuilder::new(TemporalConfig {
        policy: TemporalPolicy::Local,
        window: 2,
        n_neighbors: 4,
        ..TemporalConfig::default()
    });
    let refs: Vec<&Matrix> = snapshots.iter().collect();
    let grefs: Vec<_> = graphs.iter().collect();
    let edges = builder.build(&refs, &grefs).unwrap();

    assert!(!edges.is_empty(), "small drift must produce temporal edges");
    let stack = EpochStack::new(vec![20; 3]);
    for (&h, &t) in edges.heads.iter().zip(&edges.tails) {
        let (eh, ih) = stack.locate(h);
        let (et, it) = stack.locate(t);
        assert_eq!(ih, it, "local edge {}→{} links different samples", h, t);
        assert_ne!(eh, et, "local edge {}→{} stays inside one epoch", h, t);
    }
    assert!(edges.weights.iter().all(|&w| w > 0.0 && w <= 1.0));
}

#[test]
fn test_global_policy_keeps_cross_epoch_pairs_only() {
    init();
    let (base, _) = two_clusters(30, 5, 2.0, 31);
    let snapshots = drifting(&base, 3, 0.05, 32);
    let graphs = spatial_graphs(&snapshots);

    let builder = TemporalGraphBuilder::new(TemporalConfig {
        policy: TemporalPolicy::Global,
        n_neighbors: 5,
        knn: KnnConfig::default(),
        ..TemporalConfig::default()
    });
    let refs: Vec<&Matrix> = snapshots.iter().collect();
    let grefs: Vec<_> = graphs.iter().collect();
    let edges = builder.build(&refs, &grefs).unwrap();

    assert!(!edges.is_empty());
    let stack = EpochStack::new(vec![30; 3]);
    for (&h, &t) in edges.heads.iter().zip(&edges.tails) {
        assert_ne!(
            stack.locate(h).0,
            stack.locate(t).0,
            "global edge {}→{} is not cross-epoch",
            h,
            t
        );
    }
}

#[test]
fn test_single_epoch_has_no_temporal_edges() {
    init();
    let snapshots = vec![uniform(15, 3, 4)];
    let graphs = spatial_graphs(&snapshots);
    let refs: Vec<&Matrix> = snapshots.iter().collect();
    let grefs: Vec<_> = graphs.iter().collect();

    for policy in [TemporalPolicy::Local, TemporalPolicy::Global] {
        let builder = TemporalGraphBuilder::new(TemporalConfig {
            policy,
            ..TemporalConfig::default()
        });
        assert!(builder.build(&refs, &grefs).unwrap().is_empty());
    }
}

#[test]
fn test_mismatched_graph_count_is_rejected() {
    init();
    let snapshots = vec![uniform(10, 3, 1), uniform(10, 3, 2)];
    let graphs = spatial_graphs(&snapshots[..1]);
    let refs: Vec<&Matrix> = snapshots.iter().collect();
    let grefs: Vec<_> = graphs.iter().collect();
    let builder = TemporalGraphBuilder::new(TemporalConfig::default());
    assert!(builder.build(&refs, &grefs).is_err());
}

#[test]
fn test_neighbor_preserving_rate() {
    init();
    let knn = KnnConfig::default();
    let data = uniform(40, 4, 8);

    let first = neighbor_preserving_rate(None, &data, 5, &knn).unwrap();
    assert!(first.iter().all(|&r| r == 0.0), "no previous epoch: all rates 0");

    let same = neighbor_preserving_rate(Some(&data), &data, 5, &knn).unwrap();
    assert!(same.iter().all(|&r| (r - 1.0).abs() < 1e-6), "unchanged snapshot keeps every neighbour");

    let shuffled = uniform(40, 4, 99);
    let changed = neighbor_preserving_rate(Some(&data), &shuffled, 5, &knn).unwrap();
    let mean: f32 = changed.iter().sum::<f32>() / changed.len() as f32;
    assert!(mean < 0.5, "unrelated snapshots should share few neighbours, got {}", mean);
    assert!(changed.iter().all(|&r| (0.0..=1.0).contains(&r)));

    let wrong = uniform(30, 4, 1);
    assert!(neighbor_preserving_rate(Some(&wrong), &data, 5, &knn).is_err());
}
