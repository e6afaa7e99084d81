use super::*;
use approx::assert_relative_eq;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tnr_core::TruncationParams;

fn buckets_of(net: &Network, n: NodeIndex) -> Vec<BucketId> {
    net.node(n).unwrap().buckets().to_vec()
}

fn assert_same_tensor(a: &ArrayTensor, b: &ArrayTensor, eps: f64) {
    assert_eq!(a.dims(), b.dims());
    for (x, y) in a.to_dense_vec().iter().zip(b.to_dense_vec()) {
        assert_relative_eq!(*x, y, epsilon = eps, max_relative = eps);
    }
}

/// Two random rank-3 nodes sharing one link: shape [2, 3, 4, 5].
fn two_node_network(seed: u64) -> (Network, NodeIndex, NodeIndex) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut net = Network::new();
    let a = net.add_node(ArrayTensor::random(&mut rng, vec![2, 3, 6]));
    let b = net.add_node(ArrayTensor::random(&mut rng, vec![6, 4, 5]));
    let (ea, eb) = (buckets_of(&net, a), buckets_of(&net, b));
    net.link(ea[2], eb[0]).unwrap();
    (net, a, b)
}

// ============================================================================
// Construction and linking
// ============================================================================

#[test]
fn test_add_node_extends_external_order() {
    let mut net = Network::new();
    let a = net.add_node(ArrayTensor::zeros(vec![2, 3]));
    let b = net.add_node(ArrayTensor::zeros(vec![4]));
    let expected: Vec<BucketId> = buckets_of(&net, a)
        .into_iter()
        .chain(buckets_of(&net, b))
        .collect();
    assert_eq!(net.external_buckets(), expected.as_slice());
    assert_eq!(net.shape(), vec![2, 3, 4]);
    net.check().unwrap();
}

#[test]
fn test_link_rejects_mismatch_and_self_loop() {
    let mut net = Network::new();
    let a = net.add_node(ArrayTensor::zeros(vec![2, 3]));
    let b = net.add_node(ArrayTensor::zeros(vec![3, 2]));
    let (ea, eb) = (buckets_of(&net, a), buckets_of(&net, b));

    let err = net.link(ea[0], eb[0]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NetworkError>(),
        Some(NetworkError::DimensionMismatch { .. })
    ));
    let err = net.link(ea[0], ea[1]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NetworkError>(),
        Some(NetworkError::SelfLoop(_, _))
    ));

    net.link(ea[1], eb[0]).unwrap();
    let err = net.link(ea[1], eb[0]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NetworkError>(),
        Some(NetworkError::BucketLinked(_))
    ));
    assert_eq!(net.external_buckets(), &[ea[0], eb[1]]);
    net.check().unwrap();
}

// ============================================================================
// Merge and split
// ============================================================================

#[test]
fn test_merge_keeps_bucket_identity() {
    let (mut net, a, b) = two_node_network(1);
    let external = net.external_buckets().to_vec();
    let dense = net.contract_all().unwrap();

    let (dummy, dummy_buckets) = net.dummy_merge_nodes(a, b).unwrap();
    assert_eq!(net.node_count(), 2);

    let m = net.merge_nodes(a, b).unwrap();
    assert_eq!(net.node_count(), 1);
    assert_eq!(net.link_count(), 0);
    assert_eq!(buckets_of(&net, m), dummy_buckets);
    assert_eq!(net.external_buckets(), external.as_slice());
    assert_same_tensor(net.tensor(m).unwrap(), &dummy, 1e-14);
    assert_same_tensor(&net.contract_all().unwrap(), &dense, 1e-12);
    net.check().unwrap();
}

#[test]
fn test_merge_requires_link() {
    let mut net = Network::new();
    let a = net.add_node(ArrayTensor::zeros(vec![2]));
    let b = net.add_node(ArrayTensor::zeros(vec![2]));
    let err = net.merge_nodes(a, b).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NetworkError>(),
        Some(NetworkError::NotConnected(_, _))
    ));
}

#[test]
fn test_merge_retargets_third_party_links() {
    let (mut net, a, b) = two_node_network(2);
    let c = net.add_node(ArrayTensor::identity(5));
    let eb = buckets_of(&net, b);
    let ec = buckets_of(&net, c);
    net.link(eb[2], ec[0]).unwrap();

    let m = net.merge_nodes(a, b).unwrap();
    assert_eq!(net.internal_connected(m).unwrap().into_iter().collect::<Vec<_>>(), vec![c]);
    assert_eq!(net.links_between(m, c).len(), 1);
    net.check().unwrap();
}

#[test]
fn test_merge_split_roundtrip() {
    let (mut net, a, b) = two_node_network(3);
    let dense = net.contract_all().unwrap();
    let left = buckets_of(&net, a)[..2].to_vec();

    let m = net.merge_nodes(a, b).unwrap();
    let outcome = net.split_node(m, &left, &TruncationParams::new()).unwrap();
    assert_eq!(outcome.discarded, 0.0);
    assert_eq!(net.node_count(), 2);
    assert_eq!(net.link_count(), 1);
    assert_eq!(&buckets_of(&net, outcome.left)[..2], left.as_slice());
    net.check().unwrap();

    assert_same_tensor(&net.contract_all().unwrap(), &dense, 1e-10);
}

#[test]
fn test_split_rejects_empty_side() {
    let (mut net, a, _) = two_node_network(4);
    let all = buckets_of(&net, a);
    let params = TruncationParams::new();
    assert!(net.split_node(a, &[], &params).is_err());
    assert!(net.split_node(a, &all, &params).is_err());
}

// ============================================================================
// Links, trace and cuts
// ============================================================================

#[test]
fn test_remove_link_appends_buckets() {
    let (mut net, a, b) = two_node_network(5);
    let e = net.links_between(a, b)[0];
    let (b1, b2) = net.remove_link(e).unwrap();
    assert_eq!(net.link_count(), 0);
    assert_eq!(&net.external_buckets()[4..], &[b1, b2]);
    assert_eq!(net.connected_components().len(), 2);
    net.check().unwrap();
}

#[test]
fn test_cut_links_is_exact() {
    let mut net = Network::new();
    let u = ArrayTensor::new(vec![3, 1], vec![1.0, 2.0, 3.0]).unwrap();
    let v = ArrayTensor::new(vec![1, 2], vec![4.0, 5.0]).unwrap();
    let a = net.add_node(u);
    let b = net.add_node(v);
    let (ea, eb) = (buckets_of(&net, a), buckets_of(&net, b));
    net.link(ea[1], eb[0]).unwrap();
    let dense = net.contract_all().unwrap();

    assert_eq!(net.cut_links().unwrap(), 1);
    assert_eq!(net.link_count(), 0);
    assert_eq!(net.shape(), vec![3, 2]);
    assert_same_tensor(&net.contract_all().unwrap(), &dense, 1e-12);
    net.check().unwrap();
}

#[test]
fn test_trace_same_node_identity() {
    let mut net = Network::new();
    let a = net.add_node(ArrayTensor::identity(4));
    let ea = buckets_of(&net, a);
    net.trace(ea[0], ea[1]).unwrap();
    assert!(net.external_buckets().is_empty());
    let value = net.contract_all().unwrap().scalar().unwrap();
    assert_relative_eq!(value, 4.0, epsilon = 1e-12);
    net.check().unwrap();
}

#[test]
fn test_trace_across_nodes_links() {
    let mut net = Network::new();
    let a = net.add_node(ArrayTensor::identity(2));
    let b = net.add_node(ArrayTensor::identity(2));
    let (ea, eb) = (buckets_of(&net, a), buckets_of(&net, b));
    net.link(ea[1], eb[0]).unwrap();
    net.trace(ea[0], eb[1]).unwrap();
    assert_eq!(net.link_count(), 2);
    assert_eq!(net.cyclomatic_number(), 1);
    assert_relative_eq!(net.contract_all().unwrap().scalar().unwrap(), 2.0, epsilon = 1e-12);
}

// ============================================================================
// Topology
// ============================================================================

#[test]
fn test_cycle_basis_of_square() {
    let mut net = Network::new();
    let nodes: Vec<NodeIndex> = (0..4)
        .map(|_| net.add_node(ArrayTensor::zeros(vec![2, 2, 2])))
        .collect();
    for i in 0..4 {
        let right = buckets_of(&net, nodes[i])[2];
        let left = buckets_of(&net, nodes[(i + 1) % 4])[0];
        net.link(right, left).unwrap();
    }
    assert_eq!(net.cyclomatic_number(), 1);
    let basis = net.cycle_basis();
    assert_eq!(basis.len(), 1);
    let mut cycle = basis[0].clone();
    cycle.sort();
    assert_eq!(cycle, nodes);
    for w in basis[0].windows(2) {
        assert!(!net.links_between(w[0], w[1]).is_empty());
    }
}

#[test]
fn test_parallel_links_form_two_cycle() {
    let mut net = Network::new();
    let a = net.add_node(ArrayTensor::zeros(vec![2, 3]));
    let b = net.add_node(ArrayTensor::zeros(vec![2, 3]));
    let (ea, eb) = (buckets_of(&net, a), buckets_of(&net, b));
    net.link(ea[0], eb[0]).unwrap();
    net.link(ea[1], eb[1]).unwrap();
    let basis = net.cycle_basis();
    assert_eq!(basis.len(), 1);
    assert_eq!(basis[0].len(), 2);
    assert_eq!(net.to_graph().edge_count(), 2);
}

#[test]
fn test_graph_and_shape_report_real_widths() {
    let (mut net, a, b) = two_node_network(9);
    let graph = net.to_graph();
    let widths: Vec<usize> = graph.edge_weights().copied().collect();
    assert_eq!(widths, vec![6]);
    assert_eq!(net.shape(), vec![2, 3, 4, 5]);

    // severing the link appends both width-6 buckets
    let e = net.links_between(a, b)[0];
    net.remove_link(e).unwrap();
    assert_eq!(net.shape(), vec![2, 3, 4, 5, 6, 6]);
    assert_eq!(net.to_graph().edge_count(), 0);
}

#[test]
fn test_transform_bucket_maps_one_axis() {
    let (mut net, a, b) = two_node_network(10);
    let ea = buckets_of(&net, a);
    let before = net.tensor(a).unwrap().clone();

    // external axis of width 3 mapped to width 2 by summing pairs of entries
    let matrix = ArrayTensor::from_fn(vec![2, 3], |i| {
        if i[1] == i[0] || i[1] == i[0] + 1 {
            1.0
        } else {
            0.0
        }
    });
    net.transform_bucket(ea[1], &matrix).unwrap();
    let after = net.tensor(a).unwrap();
    assert_eq!(after.dims(), &[2, 2, 6]);
    assert_relative_eq!(
        after.get(&[1, 0, 4]).unwrap(),
        before.get(&[1, 0, 4]).unwrap() + before.get(&[1, 1, 4]).unwrap(),
        epsilon = 1e-12
    );
    assert_eq!(net.shape(), vec![2, 2, 4, 5]);
    net.check().unwrap();

    // a linked bucket must keep its width
    let linked = buckets_of(&net, b)[0];
    assert!(net.transform_bucket(linked, &ArrayTensor::zeros(vec![2, 6])).is_err());
}

#[test]
fn test_shortest_path_and_components() {
    let mut net = Network::new();
    let nodes: Vec<NodeIndex> = (0..4)
        .map(|_| net.add_node(ArrayTensor::zeros(vec![2, 2])))
        .collect();
    for i in 0..2 {
        let right = buckets_of(&net, nodes[i])[1];
        let left = buckets_of(&net, nodes[i + 1])[0];
        net.link(right, left).unwrap();
    }
    let path = net.shortest_path(nodes[0], nodes[2]).unwrap().unwrap();
    assert_eq!(path, vec![nodes[0], nodes[1], nodes[2]]);
    assert!(net.shortest_path(nodes[0], nodes[3]).unwrap().is_none());
    assert_eq!(net.connected_components().len(), 2);
    assert_eq!(net.component_count(), 2);
    assert!(net.is_acyclic());
}

// ============================================================================
// Copies
// ============================================================================

#[test]
fn test_copy_subset_preserves_ids() {
    let (net, a, _) = two_node_network(6);
    let subset: BTreeSet<NodeIndex> = [a].into_iter().collect();
    let (copy, map) = net.copy_subset(&subset).unwrap();
    assert_eq!(copy.node_count(), 1);
    let copied = copy.node(map[&a]).unwrap().buckets().to_vec();
    assert_eq!(copied, buckets_of(&net, a));
    // the cut link's bucket comes after the originally external ones
    assert_eq!(copy.external_buckets(), copied.as_slice());
    copy.check().unwrap();
}

#[test]
fn test_absorb_renames_and_appends() {
    let (mut net, _, _) = two_node_network(7);
    let (other, _, _) = two_node_network(8);
    let own_dense = net.contract_all().unwrap();
    let other_dense = other.contract_all().unwrap();
    let own_ext = net.external_buckets().to_vec();

    let rename = net.absorb(other.clone()).unwrap();
    assert_eq!(net.node_count(), 4);
    assert_eq!(&net.external_buckets()[..4], own_ext.as_slice());
    let appended: Vec<BucketId> = other.external_buckets().iter().map(|b| rename[b]).collect();
    assert_eq!(&net.external_buckets()[4..], appended.as_slice());
    net.check().unwrap();

    // disjoint components multiply, so their Frobenius norms do too
    let dense = net.contract_all().unwrap();
    assert_eq!(dense.dims(), &[2, 3, 4, 5, 2, 3, 4, 5]);
    assert_relative_eq!(
        dense.log_norm(),
        own_dense.log_norm() + other_dense.log_norm(),
        epsilon = 1e-9
    );
}

#[test]
fn test_display_lists_nodes() {
    let (net, _, _) = two_node_network(9);
    let text = net.to_string();
    assert!(text.contains("2 nodes, 1 links"));
    assert!(text.contains("dims [2, 3, 6]"));
}
