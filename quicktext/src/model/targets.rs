//! Output-side structures built from class counts: the Huffman tree for
//! hierarchical softmax and the table negatives are drawn from.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::args::LossName;

const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<usize>,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub count: u64,
    /// Set on the second child chosen when this node's parent was built.
    pub binary: bool,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Shared, read-only during training.
#[derive(Debug, Default)]
pub struct Targets {
    osz: usize,
    negatives: Vec<u32>,
    tree: Vec<Node>,
    /// Per leaf, output rows of the internal nodes on the way to the root.
    paths: Vec<Vec<usize>>,
    codes: Vec<Vec<bool>>,
}

impl Targets {
    /// Builds whatever `loss` samples from during training. `counts` are the
    /// class counts in id order, which is decreasing count order.
    pub fn new<R: Rng + ?Sized>(loss: LossName, counts: &[u64], rng: &mut R) -> Self {
        let mut targets = Targets {
            osz: counts.len(),
            ..Targets::default()
        };
        match loss {
            LossName::Hs => targets.build_tree(counts),
            LossName::Ns | LossName::Polarization => targets.init_table_negatives(counts, rng),
            LossName::Softmax => {}
        }
        targets
    }

    /// Only what prediction needs: the tree, for hierarchical softmax.
    pub fn for_inference(loss: LossName, counts: &[u64]) -> Self {
        let mut targets = Targets {
            osz: counts.len(),
            ..Targets::default()
        };
        if loss == LossName::Hs {
            targets.build_tree(counts);
        }
        targets
    }

    pub fn osz(&self) -> usize {
        self.osz
    }

    pub fn negatives(&self) -> &[u32] {
        &self.negatives
    }

    pub fn tree(&self) -> &[Node] {
        &self.tree
    }

    pub fn root(&self) -> usize {
        2 * self.osz - 2
    }

    pub fn path(&self, target: usize) -> &[usize] {
        &self.paths[target]
    }

    pub fn code(&self, target: usize) -> &[bool] {
        &self.codes[target]
    }

    /// Fills the negative table: each class gets a share of slots
    /// proportional to `count^0.75`, then the table is shuffled.
    pub fn init_table_negatives<R: Rng + ?Sized>(&mut self, counts: &[u64], rng: &mut R) {
        let power: f64 = 0.75;
        let z = counts.iter().map(|&c| (c as f64).powf(power)).sum::<f64>();
        self.negatives = Vec::with_capacity(NEGATIVE_TABLE_SIZE + counts.len());
        for (i, &c) in counts.iter().enumerate() {
            let slots = ((c as f64).powf(power) * NEGATIVE_TABLE_SIZE as f64 / z).ceil() as usize;
            self.negatives
                .extend(std::iter::repeat(i as u32).take(slots));
        }
        self.negatives.shuffle(rng);
    }

    /// Builds the Huffman tree over `counts`, which must be sorted in
    /// decreasing order. Leaves are `0..osz`, internal nodes follow, and
    /// the root is the last node.
    pub fn build_tree(&mut self, counts: &[u64]) {
        let osz = counts.len();
        self.osz = osz;
        self.tree.clear();
        self.paths.clear();
        self.codes.clear();
        if osz == 0 {
            return;
        }

        self.tree = (0..2 * osz - 1)
            .map(|i| Node {
                parent: None,
                left: None,
                right: None,
                count: counts.get(i).copied().unwrap_or(1_000_000_000_000_000),
                binary: false,
            })
            .collect();

        // Two runs: leaves in increasing count from the end of `counts`, and
        // internal nodes in the order they are created, which is also
        // increasing count.
        let mut leaf = osz;
        let mut node = osz;
        for i in osz..(2 * osz - 1) {
            let mut mini = [0; 2];
            for m in &mut mini {
                if leaf > 0 && self.tree[leaf - 1].count < self.tree[node].count {
                    leaf -= 1;
                    *m = leaf;
                } else {
                    *m = node;
                    node += 1;
                }
            }
            self.tree[i].left = Some(mini[0]);
            self.tree[i].right = Some(mini[1]);
            self.tree[i].count = self.tree[mini[0]].count + self.tree[mini[1]].count;
            self.tree[mini[0]].parent = Some(i);
            self.tree[mini[1]].parent = Some(i);
            self.tree[mini[1]].binary = true;
        }

        for i in 0..osz {
            let mut path = vec![];
            let mut code = vec![];
            let mut j = i;
            while let Some(parent) = self.tree[j].parent {
                path.push(parent - osz);
                code.push(self.tree[j].binary);
                j = parent;
            }
            self.paths.push(path);
            self.codes.push(code);
        }
    }
}
