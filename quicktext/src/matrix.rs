//! Parameter matrices shared between training threads.

use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;
use anyhow::{anyhow, Result};
use rand::distributions::Uniform;
use rand::Rng;

use crate::real;
use crate::vector::Vector;

const ALIGNMENT: usize = 128;

/// One matrix cell.
///
/// Training threads update shared matrices without locking. Each cell is an
/// atomic only so that the racing reads and writes are defined behavior:
/// `add` is a relaxed load followed by a relaxed store, not a
/// read-modify-write, so concurrent updates to the same cell can be lost.
/// Sparse updates make that rare and the optimization tolerates it.
#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// Dense row-major matrix. The shape is fixed at construction.
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: AlignedBox<[Real]>,
}

impl Matrix {
    /// A zero-filled `rows × cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| anyhow!("matrix size {rows}x{cols} overflows"))?;
        // The allocator refuses zero-sized blocks.
        let data = AlignedBox::slice_from_default(ALIGNMENT, len.max(1))
            .map_err(|err| anyhow!("failed to allocate a {rows}x{cols} matrix: {err:?}"))?;
        Ok(Matrix { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn cells(&self) -> &[Real] {
        &self.data[..self.rows * self.cols]
    }

    /// Row `i`. Panics if `i` is out of range.
    pub fn row(&self, i: usize) -> &[Real] {
        assert!(
            i < self.rows,
            "row {i} out of range for matrix with {} rows",
            self.rows
        );
        &self.cells()[i * self.cols..][..self.cols]
    }

    pub fn zero(&mut self) {
        for cell in self.cells() {
            cell.set(0.0);
        }
    }

    /// Fill with values drawn uniformly from `[-a, a]`.
    pub fn uniform<R: Rng + ?Sized>(&mut self, a: real, rng: &mut R) {
        let dist = Uniform::new_inclusive(-a, a);
        for cell in self.cells() {
            cell.set(rng.sample(dist));
        }
    }

    /// `self[i] += a * v`. Takes `&self`: this is the unsynchronized update
    /// training threads apply to shared rows.
    pub fn add_row(&self, v: &Vector, i: usize, a: real) {
        assert_eq!(v.len(), self.cols);
        for (cell, &x) in self.row(i).iter().zip(v.as_slice()) {
            cell.add(a * x);
        }
    }

    pub fn dot_row(&self, v: &Vector, i: usize) -> real {
        assert_eq!(v.len(), self.cols);
        self.row(i)
            .iter()
            .zip(v.as_slice())
            .fold(0.0, |sum, (cell, &x)| sum + cell.get() * x)
    }

    /// A snapshot of every cell, row-major.
    pub fn to_vec(&self) -> Vec<real> {
        self.cells().iter().map(Real::get).collect()
    }
}
