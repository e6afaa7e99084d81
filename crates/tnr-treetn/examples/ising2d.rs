//! Free energy of a disordered periodic 2D Ising model.
//!
//! Usage: `cargo run --example ising2d -- [L] [beta] [environment|utility]`

use anyhow::{bail, Context, Result};
use flexi_logger::{opt_format, Logger};
use log::{info, LevelFilter};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tnr_treetn::{
    ArrayTensor, DiagnosticCounters, LoopStrategy, TreeTensor, TreeTensorOptions,
};

struct Lattice {
    size: usize,
    beta: f64,
    couplings: Vec<f64>,
}

impl Lattice {
    fn random(size: usize, beta: f64, seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0)?;
        let couplings = (0..2 * size * size).map(|_| normal.sample(&mut rng)).collect();
        Ok(Self {
            size,
            beta,
            couplings,
        })
    }

    fn horizontal(&self, r: usize, c: usize) -> usize {
        r * self.size + c
    }

    fn vertical(&self, r: usize, c: usize) -> usize {
        self.size * self.size + r * self.size + c
    }

    /// One labelled tree tensor per site, legs `[left, right, up, down]`.
    fn factors(&self, options: TreeTensorOptions) -> Vec<(TreeTensor, Vec<usize>)> {
        let l = self.size;
        let mut factors = Vec::with_capacity(l * l);
        for r in 0..l {
            for c in 0..l {
                let j_right = self.couplings[self.horizontal(r, c)];
                let j_down = self.couplings[self.vertical(r, c)];
                let beta = self.beta;
                let site = ArrayTensor::from_fn(vec![2; 4], |idx| {
                    if idx[0] != idx[2] {
                        return 0.0;
                    }
                    let s = spin(idx[0]);
                    (beta * s * (j_right * spin(idx[1]) + j_down * spin(idx[3]))).exp()
                });
                let labels = vec![
                    self.horizontal(r, (c + l - 1) % l),
                    self.horizontal(r, c),
                    self.vertical((r + l - 1) % l, c),
                    self.vertical(r, c),
                ];
                factors.push((TreeTensor::from_array(site, options), labels));
            }
        }
        factors
    }
}

fn spin(i: usize) -> f64 {
    if i == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Absorb neighbours into the first factor, row by row.
fn contract_lattice(
    mut factors: Vec<(TreeTensor, Vec<usize>)>,
    diag: &mut DiagnosticCounters,
) -> Result<TreeTensor> {
    let (mut acc, mut acc_labels) = factors.remove(0);
    while !factors.is_empty() {
        let partner = factors
            .iter()
            .position(|(_, labels)| labels.iter().any(|l| acc_labels.contains(l)))
            .unwrap_or(0);
        let (other, other_labels) = factors.remove(partner);
        let shared: Vec<usize> = acc_labels
            .iter()
            .copied()
            .filter(|l| other_labels.contains(l))
            .collect();
        let position = |labels: &[usize], l: usize| labels.iter().position(|&x| x == l);
        let ind: Option<Vec<usize>> = shared.iter().map(|&l| position(&acc_labels, l)).collect();
        let other_ind: Option<Vec<usize>> =
            shared.iter().map(|&l| position(&other_labels, l)).collect();
        let (Some(ind), Some(other_ind)) = (ind, other_ind) else {
            bail!("inconsistent bond labels");
        };

        acc = acc.contract_with(&ind, &other, &other_ind, diag)?;
        let report = acc.optimize_with(diag)?;
        acc_labels = acc_labels
            .iter()
            .chain(&other_labels)
            .copied()
            .filter(|l| !shared.contains(l))
            .collect();
        info!(
            remaining = factors.len(),
            rank = acc.rank(),
            nodes = acc.network().node_count(),
            size = report.size_after;
            "absorbed site"
        );
    }
    Ok(acc)
}

fn main() -> Result<()> {
    let _logger = Logger::with(LevelFilter::Info)
        .format(opt_format)
        .start()
        .context("starting logger")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let size: usize = args.first().map_or(Ok(4), |s| s.parse())?;
    let beta: f64 = args.get(1).map_or(Ok(0.4), |s| s.parse())?;
    let strategy = match args.get(2).map(String::as_str) {
        None | Some("environment") => LoopStrategy::Environment,
        Some("utility") => LoopStrategy::UtilityGuided,
        Some(other) => bail!("unknown loop strategy {other:?}"),
    };
    let options = TreeTensorOptions::default()
        .with_accuracy(1e-8)
        .with_loop_strategy(strategy);
    info!(size, beta, strategy:?; "contracting lattice");

    let lattice = Lattice::random(size, beta, 7)?;
    let mut diag = DiagnosticCounters::new();
    let z = contract_lattice(lattice.factors(options), &mut diag)?;
    let log_z = z.scalar_log()?;
    let sites = (size * size) as f64;
    let free_energy = -log_z / (beta * sites);

    info!(
        cuts = diag.cuts,
        merges = diag.simplify_merges,
        truncations = diag.truncations,
        aggregate_error = diag.aggregate_error;
        "contraction finished"
    );
    println!("L = {size}, beta = {beta}: ln Z = {log_z:.12}, f = {free_energy:.12}");
    Ok(())
}
