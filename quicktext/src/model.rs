//! The per-thread training and prediction engine.

mod targets;

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::args::{Args, LossName};
use crate::matrix::Matrix;
use crate::real;
use crate::vector::Vector;

pub use targets::{Node, Targets};

const SIGMOID_TABLE_SIZE: usize = 512;
const MAX_SIGMOID: real = 8.0;
const LOG_TABLE_SIZE: usize = 512;

type Prediction = Reverse<(OrderedFloat<real>, usize)>;

/// One engine per worker thread. The matrices are shared with every other
/// engine; the scratch vectors and the random stream are private.
pub struct Model<'a> {
    wi: &'a Matrix,
    wo: &'a Matrix,
    targets: &'a Targets,
    loss_name: LossName,
    neg: usize,
    hidden: Vector,
    /// Label indicator of the word being polarized.
    hidden_labels: Vector,
    output: Vector,
    grad: Vector,
    osz: usize,
    loss: f64,
    nexamples: u64,
    negpos: usize,
    t_sigmoid: Vec<real>,
    t_log: Vec<real>,
    pub rng: StdRng,
}

impl<'a> Model<'a> {
    pub fn new(
        wi: &'a Matrix,
        wo: &'a Matrix,
        targets: &'a Targets,
        args: &Args,
        seed: u64,
    ) -> Self {
        let hsz = wi.cols();
        let osz = wo.rows();
        let mut rng = StdRng::seed_from_u64(seed);
        let negpos = match targets.negatives().len() {
            0 => 0,
            n => rng.gen_range(0..n),
        };
        let t_sigmoid = (0..=SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as real * 2.0 * MAX_SIGMOID) / SIGMOID_TABLE_SIZE as real - MAX_SIGMOID;
                1.0 / (1.0 + (-x).exp())
            })
            .collect();
        let t_log = (0..=LOG_TABLE_SIZE)
            .map(|i| ((i as real + 1e-5) / LOG_TABLE_SIZE as real).ln())
            .collect();
        Model {
            wi,
            wo,
            targets,
            loss_name: args.loss,
            neg: args.neg,
            hidden: Vector::new(hsz),
            hidden_labels: Vector::new(hsz),
            output: Vector::new(osz),
            grad: Vector::new(hsz),
            osz,
            loss: 0.0,
            nexamples: 0,
            negpos,
            t_sigmoid,
            t_log,
            rng,
        }
    }

    pub fn sigmoid(&self, x: real) -> real {
        if x < -MAX_SIGMOID {
            0.0
        } else if x > MAX_SIGMOID {
            1.0
        } else {
            let i = ((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as real / MAX_SIGMOID / 2.0) as usize;
            self.t_sigmoid[i]
        }
    }

    /// Natural log of `x` in `(0, 1]`.
    pub fn log(&self, x: real) -> real {
        if x > 1.0 {
            return 0.0;
        }
        let i = (x * LOG_TABLE_SIZE as real) as usize;
        self.t_log[i]
    }

    /// Average loss per example so far.
    pub fn get_loss(&self) -> real {
        if self.nexamples == 0 {
            return 0.0;
        }
        (self.loss / self.nexamples as f64) as real
    }

    pub fn hidden(&self) -> &Vector {
        &self.hidden
    }

    /// Sets `hidden` to the mean of the input rows `ids`.
    pub fn compute_hidden(&mut self, ids: &[usize]) {
        self.hidden.zero();
        for &i in ids {
            self.hidden.add_row(self.wi, i, 1.0);
        }
        if !ids.is_empty() {
            self.hidden.mul(1.0 / ids.len() as real);
        }
    }

    /// Logistic loss of output row `target` against `label`. Accumulates
    /// the gradient for the hidden layer and updates the output row.
    pub fn binary_logistic(&mut self, target: usize, label: bool, lr: real) -> real {
        let score = self.sigmoid(self.wo.dot_row(&self.hidden, target));
        let alpha = lr * (label as u8 as real - score);
        self.grad.add_row(self.wo, target, alpha);
        self.wo.add_row(&self.hidden, target, alpha);
        if label {
            -self.log(score)
        } else {
            -self.log(1.0 - score)
        }
    }

    pub fn negative_sampling(&mut self, target: usize, lr: real) -> real {
        let mut loss = self.binary_logistic(target, true, lr);
        for _ in 0..self.neg {
            if let Some(negative) = self.get_negative(target) {
                loss += self.binary_logistic(negative, false, lr);
            }
        }
        loss
    }

    /// Next class from the negative table other than `target`, or `None`
    /// if the table holds nothing else.
    pub fn get_negative(&mut self, target: usize) -> Option<usize> {
        let targets = self.targets;
        let negatives = targets.negatives();
        for _ in 0..negatives.len() {
            let negative = negatives[self.negpos] as usize;
            self.negpos = (self.negpos + 1) % negatives.len();
            if negative != target {
                return Some(negative);
            }
        }
        None
    }

    pub fn hierarchical_softmax(&mut self, target: usize, lr: real) -> real {
        let targets = self.targets;
        targets
            .path(target)
            .iter()
            .zip(targets.code(target))
            .map(|(&node, &bit)| self.binary_logistic(node, bit, lr))
            .sum()
    }

    /// Sets `output` to the softmax of the output layer.
    pub fn compute_output_softmax(&mut self) {
        self.output.mul_matrix(self.wo, &self.hidden);
        let max = (0..self.osz).fold(real::NEG_INFINITY, |m, i| m.max(self.output[i]));
        let mut z = 0.0;
        for i in 0..self.osz {
            self.output[i] = (self.output[i] - max).exp();
            z += self.output[i];
        }
        for i in 0..self.osz {
            self.output[i] /= z;
        }
    }

    pub fn softmax(&mut self, target: usize, lr: real) -> real {
        self.compute_output_softmax();
        for i in 0..self.osz {
            let label = if i == target { 1.0 } else { 0.0 };
            let alpha = lr * (label - self.output[i]);
            self.grad.add_row(self.wo, i, alpha);
            self.wo.add_row(&self.hidden, i, alpha);
        }
        -self.log(self.output[target])
    }

    /// One gradient step predicting `target` from the mean of input rows
    /// `ids`. The input rows are updated without synchronization.
    pub fn update(&mut self, ids: &[usize], target: usize, lr: real) {
        assert!(
            target < self.osz,
            "target {target} out of range for {} classes",
            self.osz
        );
        if ids.is_empty() {
            return;
        }
        self.compute_hidden(ids);
        self.grad.zero();
        let loss = match self.loss_name {
            LossName::Ns | LossName::Polarization => self.negative_sampling(target, lr),
            LossName::Hs => self.hierarchical_softmax(target, lr),
            LossName::Softmax => self.softmax(target, lr),
        };
        self.loss += loss as f64;
        self.nexamples += 1;

        self.grad.mul(1.0 / ids.len() as real);
        for &i in ids {
            self.wi.add_row(&self.grad, i, 1.0);
        }
    }

    /// The `k` most likely classes given input rows `ids`, as
    /// (log-probability, class) pairs, most likely first.
    pub fn predict(&mut self, ids: &[usize], k: usize) -> Vec<(real, usize)> {
        if k == 0 || self.osz == 0 {
            return vec![];
        }
        self.compute_hidden(ids);
        if self.loss_name != LossName::Hs && k == 1 {
            self.compute_output_softmax();
            let best = self.output.argmax();
            return vec![(self.log(self.output[best]), best)];
        }

        let mut heap = BinaryHeap::with_capacity(k + 1);
        if self.loss_name == LossName::Hs {
            self.dfs(k, self.targets.root(), 0.0, &mut heap);
        } else {
            self.find_k_best(k, &mut heap);
        }
        let mut predictions: Vec<(real, usize)> = heap
            .into_vec()
            .into_iter()
            .map(|Reverse((score, i))| (score.into_inner(), i))
            .collect();
        predictions.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        predictions
    }

    fn push_bounded(heap: &mut BinaryHeap<Prediction>, k: usize, score: real, i: usize) {
        heap.push(Reverse((OrderedFloat(score), i)));
        if heap.len() > k {
            heap.pop();
        }
    }

    /// True if `score` cannot make it into a full heap.
    fn below_kth(heap: &BinaryHeap<Prediction>, k: usize, score: real) -> bool {
        match heap.peek() {
            Some(Reverse((worst, _))) => heap.len() == k && score < worst.into_inner(),
            None => false,
        }
    }

    fn find_k_best(&mut self, k: usize, heap: &mut BinaryHeap<Prediction>) {
        self.compute_output_softmax();
        for i in 0..self.osz {
            let score = self.log(self.output[i]);
            if Self::below_kth(heap, k, score) {
                continue;
            }
            Self::push_bounded(heap, k, score, i);
        }
    }

    fn dfs(&self, k: usize, node: usize, score: real, heap: &mut BinaryHeap<Prediction>) {
        if Self::below_kth(heap, k, score) {
            return;
        }
        let tree = self.targets.tree();
        let (left, right) = match (tree[node].left, tree[node].right) {
            (Some(left), Some(right)) => (left, right),
            _ => {
                Self::push_bounded(heap, k, score, node);
                return;
            }
        };
        let f = self.sigmoid(self.wo.dot_row(&self.hidden, node - self.osz));
        self.dfs(k, left, score + self.log(1.0 - f), heap);
        self.dfs(k, right, score + self.log(f), heap);
    }

    /// Sets the label indicator used by [`update_polarization`](Self::update_polarization).
    pub fn set_hidden_labels(&mut self, labels: &[usize]) {
        self.hidden_labels = Vector::from_indices(self.hidden.len(), labels);
    }

    /// Pulls each coordinate of input row `id` toward the label indicator,
    /// with a logistic loss per coordinate.
    pub fn update_polarization(&mut self, id: usize, lr: real) {
        let mut loss = 0.0;
        for (j, cell) in self.wi.row(id).iter().enumerate() {
            let label = self.hidden_labels[j];
            let score = self.sigmoid(cell.get());
            cell.add(lr * (label - score));
            loss += if label > 0.0 {
                -self.log(score)
            } else {
                -self.log(1.0 - score)
            };
        }
        self.loss += loss as f64;
        self.nexamples += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(loss: LossName) -> Args {
        Args {
            loss,
            neg: 2,
            ..Args::default()
        }
    }

    /// Input rows are one-hot, so each id selects its own hidden vector.
    fn one_hot(rows: usize, cols: usize) -> Matrix {
        let m = Matrix::new(rows, cols).unwrap();
        for i in 0..rows {
            m.row(i)[i % cols].set(1.0);
        }
        m
    }

    #[test]
    fn lookup_tables() {
        let wi = Matrix::new(1, 1).unwrap();
        let wo = Matrix::new(1, 1).unwrap();
        let targets = Targets::default();
        let model = Model::new(&wi, &wo, &targets, &args(LossName::Softmax), 0);
        assert!((model.sigmoid(0.0) - 0.5).abs() < 0.01);
        assert_eq!(model.sigmoid(-9.0), 0.0);
        assert_eq!(model.sigmoid(9.0), 1.0);
        assert!(model.sigmoid(2.0) > model.sigmoid(1.0));
        assert!((model.log(0.5) - 0.5f32.ln()).abs() < 0.01);
        assert!(model.log(1.0).abs() < 1e-4);
        assert_eq!(model.log(2.0), 0.0);
        assert!(model.log(0.0).is_finite());
        assert_eq!(model.get_loss(), 0.0);
    }

    #[test]
    fn hidden_is_the_mean() {
        let wi = one_hot(3, 3);
        let wo = Matrix::new(2, 3).unwrap();
        let targets = Targets::default();
        let mut model = Model::new(&wi, &wo, &targets, &args(LossName::Softmax), 0);
        model.compute_hidden(&[0, 2]);
        assert_eq!(model.hidden().as_slice(), &[0.5, 0.0, 0.5]);
        model.compute_hidden(&[]);
        assert_eq!(model.hidden().as_slice(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn softmax_is_normalized() {
        let wi = one_hot(4, 4);
        let wo = Matrix::new(5, 4).unwrap();
        for i in 0..5 {
            for (j, cell) in wo.row(i).iter().enumerate() {
                cell.set((i * j) as real * 0.3 - 1.0);
            }
        }
        let targets = Targets::default();
        let mut model = Model::new(&wi, &wo, &targets, &args(LossName::Softmax), 0);
        model.compute_hidden(&[1, 3]);
        model.compute_output_softmax();
        let total: real = (0..5).map(|i| model.output[i]).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!((0..5).all(|i| model.output[i] > 0.0));
    }

    #[test]
    fn update_is_a_no_op_without_input_or_rate() {
        let wi = one_hot(3, 3);
        let wo = Matrix::new(3, 3).unwrap();
        wo.row(1)[1].set(0.5);
        let targets = Targets::default();
        let mut model = Model::new(&wi, &wo, &targets, &args(LossName::Softmax), 0);
        let (before_in, before_out) = (wi.to_vec(), wo.to_vec());

        model.update(&[], 1, 0.5);
        assert_eq!(model.get_loss(), 0.0);
        model.update(&[0, 1], 1, 0.0);
        assert_eq!(wi.to_vec(), before_in);
        assert_eq!(wo.to_vec(), before_out);
        assert!(model.get_loss() > 0.0);
    }

    #[test]
    #[should_panic]
    fn update_rejects_unknown_target() {
        let wi = one_hot(3, 3);
        let wo = Matrix::new(3, 3).unwrap();
        let targets = Targets::default();
        let mut model = Model::new(&wi, &wo, &targets, &args(LossName::Softmax), 0);
        model.update(&[0], 3, 0.1);
    }

    #[test]
    fn negatives_skip_the_target() {
        let wi = one_hot(3, 3);
        let wo = Matrix::new(3, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let targets = Targets::new(LossName::Ns, &[10, 5, 1], &mut rng);
        let mut model = Model::new(&wi, &wo, &targets, &args(LossName::Ns), 3);
        for _ in 0..1000 {
            assert_ne!(model.get_negative(0), Some(0));
        }

        let single = Targets::new(LossName::Ns, &[4], &mut rng);
        let wo = Matrix::new(1, 3).unwrap();
        let mut model = Model::new(&wi, &wo, &single, &args(LossName::Ns), 3);
        assert_eq!(model.get_negative(0), None);
    }

    #[test]
    fn sampled_negatives_follow_smoothed_counts() {
        let counts = [1000u64, 100, 10, 1];
        let mut rng = StdRng::seed_from_u64(0);
        let targets = Targets::new(LossName::Ns, &counts, &mut rng);
        let wi = one_hot(4, 4);
        let wo = Matrix::new(4, 4).unwrap();
        let mut model = Model::new(&wi, &wo, &targets, &args(LossName::Ns), 7);
        let weights: Vec<f64> = counts.iter().map(|&c| (c as f64).powf(0.75)).collect();
        let z: f64 = weights.iter().sum();

        let draws = 2_000_000;
        let mut seen = [0usize; 4];
        for _ in 0..draws {
            // No class has id 4, so nothing is skipped.
            seen[model.get_negative(4).unwrap()] += 1;
        }
        for i in 0..4 {
            let actual = seen[i] as f64 / draws as f64;
            let expected = weights[i] / z;
            assert!((actual - expected).abs() < 0.002, "class {i}: {actual} vs {expected}");
        }

        // Excluding the target renormalizes over the other classes.
        let draws = 500_000;
        let mut seen = [0usize; 4];
        for _ in 0..draws {
            seen[model.get_negative(0).unwrap()] += 1;
        }
        assert_eq!(seen[0], 0);
        let rest = z - weights[0];
        for i in 1..4 {
            let actual = seen[i] as f64 / draws as f64;
            let expected = weights[i] / rest;
            assert!((actual - expected).abs() < 0.01, "class {i}: {actual} vs {expected}");
        }
    }

    fn learns_to_predict(loss: LossName) {
        let counts = [8, 4, 2, 1];
        let mut rng = StdRng::seed_from_u64(0);
        let targets = Targets::new(loss, &counts, &mut rng);
        let wi = one_hot(4, 4);
        let wo = Matrix::new(4, 4).unwrap();
        let mut model = Model::new(&wi, &wo, &targets, &args(loss), 1);
        // Input i should predict class 3 - i.
        for _ in 0..500 {
            for i in 0..4 {
                model.update(&[i], 3 - i, 0.1);
            }
        }
        for i in 0..4 {
            let top = model.predict(&[i], 1);
            assert_eq!(top.len(), 1);
            assert_eq!(top[0].1, 3 - i, "{loss:?}");

            let all = model.predict(&[i], 4);
            assert_eq!(all.len(), 4);
            assert_eq!(all[0].1, 3 - i);
            assert!(all.windows(2).all(|w| w[0].0 >= w[1].0));
            assert!(all.iter().all(|&(score, _)| score < 1e-6));
        }
        assert!(model.predict(&[0], 0).is_empty());
    }

    #[test]
    fn softmax_learns() {
        learns_to_predict(LossName::Softmax);
    }

    #[test]
    fn hierarchical_softmax_learns() {
        learns_to_predict(LossName::Hs);
    }

    #[test]
    fn negative_sampling_learns() {
        learns_to_predict(LossName::Ns);
    }

    #[test]
    fn hierarchical_probabilities_sum_to_one() {
        let counts = [5, 4, 3, 2, 1];
        let targets = Targets::for_inference(LossName::Hs, &counts);
        let wi = one_hot(2, 3);
        let wo = Matrix::new(5, 3).unwrap();
        for i in 0..5 {
            for (j, cell) in wo.row(i).iter().enumerate() {
                cell.set(((i + 2 * j) % 3) as real - 1.0);
            }
        }
        let mut model = Model::new(&wi, &wo, &targets, &args(LossName::Hs), 0);
        let all = model.predict(&[0, 1], 5);
        let total: real = all.iter().map(|&(score, _)| score.exp()).sum();
        assert!((total - 1.0).abs() < 0.05, "{total}");
    }

    #[test]
    fn polarization_moves_toward_labels() {
        let wi = Matrix::new(2, 3).unwrap();
        let wo = Matrix::new(2, 3).unwrap();
        let targets = Targets::default();
        let mut model = Model::new(&wi, &wo, &targets, &args(LossName::Polarization), 0);
        model.set_hidden_labels(&[1]);
        model.update_polarization(0, 0.5);
        let first = model.get_loss();
        for _ in 0..50 {
            model.update_polarization(0, 0.5);
        }
        let row = wi.row(0);
        assert!(row[1].get() > 0.0);
        assert!(row[0].get() < 0.0);
        assert!(row[2].get() < 0.0);
        assert!(model.get_loss() < first);
        // Only the polarized row moves.
        assert!(wi.row(1).iter().all(|cell| cell.get() == 0.0));
        assert!(wo.to_vec().iter().all(|&x| x == 0.0));
    }
}
