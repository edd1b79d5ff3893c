use std::fmt;
use std::ops::{Index, IndexMut};

use crate::matrix::Matrix;
use crate::real;

/// A private dense buffer: hidden layer, gradient or output scores.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: Vec<real>,
}

impl Vector {
    pub fn new(len: usize) -> Self {
        Vector {
            data: vec![0.0; len],
        }
    }

    /// A vector of zeros with a 1.0 at each of `indices`.
    pub fn from_indices(len: usize, indices: &[usize]) -> Self {
        let mut v = Vector::new(len);
        for &i in indices {
            assert!(i < len, "index {i} out of range for vector of length {len}");
            v.data[i] = 1.0;
        }
        v
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[real] {
        &self.data
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    pub fn ones(&mut self) {
        self.data.fill(1.0);
    }

    pub fn mul(&mut self, a: real) {
        for x in &mut self.data {
            *x *= a;
        }
    }

    /// `self += a * m[i]`.
    pub fn add_row(&mut self, m: &Matrix, i: usize, a: real) {
        assert_eq!(self.len(), m.cols());
        for (x, cell) in self.data.iter_mut().zip(m.row(i)) {
            *x += a * cell.get();
        }
    }

    /// `self = m · v`.
    pub fn mul_matrix(&mut self, m: &Matrix, v: &Vector) {
        assert_eq!(m.rows(), self.len());
        assert_eq!(m.cols(), v.len());
        for (i, x) in self.data.iter_mut().enumerate() {
            *x = m.dot_row(v, i);
        }
    }

    /// Index of the largest element; the first one on ties. Panics if empty.
    pub fn argmax(&self) -> usize {
        assert!(!self.is_empty(), "argmax of an empty vector");
        let mut best = 0;
        for (i, &x) in self.data.iter().enumerate().skip(1) {
            if x > self.data[best] {
                best = i;
            }
        }
        best
    }
}

impl Index<usize> for Vector {
    type Output = real;

    fn index(&self, i: usize) -> &real {
        &self.data[i]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, i: usize) -> &mut real {
        &mut self.data[i]
    }
}

/// Space-separated components.
impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, x) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{x}")?;
        }
        Ok(())
    }
}
