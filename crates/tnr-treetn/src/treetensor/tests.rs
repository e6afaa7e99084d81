use super::*;
use crate::diagnostics::DiagnosticCounters;
use crate::error::TreeTensorError;
use approx::assert_relative_eq;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tnr_core::TruncationParams;

fn random_tree(rng: &mut ChaCha8Rng, dims: Vec<usize>) -> TreeTensor {
    TreeTensor::from_array(ArrayTensor::random(rng, dims), TreeTensorOptions::default())
}

fn tree_error(err: &anyhow::Error) -> Option<&TreeTensorError> {
    err.downcast_ref::<TreeTensorError>()
}

#[test]
fn test_from_array_roundtrip() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let dense = ArrayTensor::random(&mut rng, vec![2, 3, 4]);
    let tree = TreeTensor::from_array(dense.clone(), TreeTensorOptions::default());
    assert_eq!(tree.shape(), vec![2, 3, 4]);
    assert_eq!(tree.rank(), 3);
    assert_eq!(tree.size(), 24);

    let back = tree.array().unwrap();
    assert_eq!(back.dims(), dense.dims());
    for (x, y) in back.to_dense_vec().iter().zip(dense.to_dense_vec()) {
        assert_relative_eq!(*x, y, epsilon = 1e-14);
    }
}

#[test]
fn test_empty_tree_is_one() {
    let tree = TreeTensor::new(TreeTensorOptions::default());
    assert_eq!(tree.rank(), 0);
    assert_relative_eq!(tree.scalar_log().unwrap(), 0.0, epsilon = 1e-15);
}

#[test]
fn test_contract_validates_indices() {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let a = random_tree(&mut rng, vec![2, 3]);
    let b = random_tree(&mut rng, vec![3, 4]);

    let err = a.contract(&[0], &b, &[0]).unwrap_err();
    assert!(matches!(
        tree_error(&err),
        Some(TreeTensorError::DimensionMismatch { .. })
    ));

    let err = a.contract(&[1, 1], &b, &[0, 0]).unwrap_err();
    assert!(matches!(tree_error(&err), Some(TreeTensorError::IndexReused(1))));

    let err = a.contract(&[1], &b, &[]).unwrap_err();
    assert!(matches!(
        tree_error(&err),
        Some(TreeTensorError::IndexCountMismatch(1, 0))
    ));

    let err = a.contract(&[5], &b, &[0]).unwrap_err();
    assert!(matches!(
        tree_error(&err),
        Some(TreeTensorError::IndexOutOfRange { index: 5, rank: 2 })
    ));
}

#[test]
fn test_contract_leaves_operands_untouched() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let a = random_tree(&mut rng, vec![2, 3]);
    let b = random_tree(&mut rng, vec![3, 4]);
    let c = a.contract(&[1], &b, &[0]).unwrap();
    assert_eq!(c.shape(), vec![2, 4]);
    assert_eq!(a.shape(), vec![2, 3]);
    assert_eq!(b.shape(), vec![3, 4]);
    a.check().unwrap();
    b.check().unwrap();
}

#[test]
fn test_trace_identity_gives_dimension() {
    let tree = TreeTensor::from_array(ArrayTensor::identity(5), TreeTensorOptions::default());
    let traced = tree.trace(&[0], &[1]).unwrap();
    assert_eq!(traced.rank(), 0);
    assert_relative_eq!(traced.array().unwrap().scalar().unwrap(), 5.0, epsilon = 1e-12);
}

#[test]
fn test_trace_rejects_mismatched_widths() {
    let tree = TreeTensor::from_array(ArrayTensor::zeros(vec![2, 3]), TreeTensorOptions::default());
    let err = tree.trace(&[0], &[1]).unwrap_err();
    assert!(matches!(
        tree_error(&err),
        Some(TreeTensorError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_flatten_combines_indices() {
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let dense = ArrayTensor::random(&mut rng, vec![2, 3, 4]);
    let tree = TreeTensor::from_array(dense.clone(), TreeTensorOptions::default());

    let flat = tree.flatten(&[0, 2]).unwrap();
    assert_eq!(flat.shape(), vec![8, 3]);
    let out = flat.array().unwrap();
    for i in 0..2 {
        for j in 0..3 {
            for k in 0..4 {
                assert_relative_eq!(
                    out.get(&[i * 4 + k, j]).unwrap(),
                    dense.get(&[i, j, k]).unwrap(),
                    epsilon = 1e-13
                );
            }
        }
    }

    let err = tree.flatten(&[1]).unwrap_err();
    assert!(matches!(tree_error(&err), Some(TreeTensorError::FlattenTooFew(1))));
}

#[test]
fn test_flatten_across_nodes() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let a = random_tree(&mut rng, vec![2, 3, 5]);
    let b = random_tree(&mut rng, vec![5, 4, 2]);
    let ab = a.contract(&[2], &b, &[0]).unwrap();
    assert_eq!(ab.network().node_count(), 2);
    let dense = ab.array().unwrap();

    // indices 0 and 3 live on different nodes; the result sits where 3 was
    let flat = ab.flatten(&[3, 0]).unwrap();
    assert_eq!(flat.shape(), vec![3, 4, 4]);
    flat.check().unwrap();
    let out = flat.array().unwrap();
    for i in 0..2 {
        for l in 0..2 {
            assert_relative_eq!(
                out.get(&[1, 3, l * 2 + i]).unwrap(),
                dense.get(&[i, 1, 3, l]).unwrap(),
                epsilon = 1e-12
            );
        }
    }
}

#[test]
fn test_contract_rank2_on_chain() {
    let mut net = Network::new();
    let ids: Vec<_> = (0..3)
        .map(|_| net.add_node(ArrayTensor::identity(2)))
        .collect();
    for w in ids.windows(2) {
        let left = net.node(w[0]).unwrap().buckets()[1];
        let right = net.node(w[1]).unwrap().buckets()[0];
        net.link(left, right).unwrap();
    }
    let mut diag = DiagnosticCounters::new();
    let tree = TreeTensor::from_network_with(net, TreeTensorOptions::default(), &mut diag).unwrap();
    assert_eq!(tree.network().node_count(), 1);
    assert_eq!(diag.simplify_merges, 2);
    assert_eq!(diag.cuts, 0);
}

#[test]
fn test_optimize_severs_product_link() {
    // T[i, j, k, l] = f[i, k] g[j, l], stored split as {i, j} | {k, l}
    let mut rng = ChaCha8Rng::seed_from_u64(6);
    let f = ArrayTensor::random(&mut rng, vec![2, 2]);
    let g = ArrayTensor::random(&mut rng, vec![2, 2]);
    let t = f.outer(&g).permute(&[0, 2, 1, 3]).unwrap();
    let split = t.svd_split(&[0, 1], &TruncationParams::new()).unwrap();
    assert_eq!(split.bond_dim(), 4);

    let mut net = Network::new();
    let a = net.add_node(split.left);
    let b = net.add_node(split.right);
    let (ea, eb) = (
        net.node(a).unwrap().buckets().to_vec(),
        net.node(b).unwrap().buckets().to_vec(),
    );
    net.link(ea[2], eb[0]).unwrap();
    let options = TreeTensorOptions::default().with_accuracy(1e-10);
    let mut tree = TreeTensor::from_network(net, options).unwrap();
    assert_eq!(tree.size(), 32);

    let mut diag = DiagnosticCounters::new();
    let report = tree.optimize_with(&mut diag).unwrap();
    assert_eq!(report.size_before, 32);
    assert_eq!(report.size_after, 8);
    assert_eq!(report.severed, 1);
    assert_eq!(diag.last_optimize, Some((32, 8)));
    assert_eq!(tree.network().link_count(), 0);

    let out = tree.array().unwrap();
    for (x, y) in out.to_dense_vec().iter().zip(t.to_dense_vec()) {
        assert_relative_eq!(*x, y, epsilon = 1e-9);
    }
}

#[test]
fn test_display_mentions_shape() {
    let tree = TreeTensor::from_array(ArrayTensor::zeros(vec![2, 2]), TreeTensorOptions::default());
    let text = tree.to_string();
    assert!(text.starts_with("TreeTensor: shape [2, 2]"));
}
