//! Dense 3D volumes stored as flat arrays.
//!
//! Samples are laid out in C order over `(height, width, depth)`, so depth
//! is the contiguous axis: `index = (h * width + w) * depth + d`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DeconvError;

/// Dimensions of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub height: usize,
    pub width: usize,
    pub depth: usize,
}

impl Shape {
    pub const fn new(height: usize, width: usize, depth: usize) -> Self {
        Self {
            height,
            width,
            depth,
        }
    }

    /// Total number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.height * self.width * self.depth
    }

    /// True if any axis has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Axis lengths as an array, outermost first.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        [self.height, self.width, self.depth]
    }

    /// Linear index of `(h, w, d)`.
    #[inline]
    pub fn index(&self, h: usize, w: usize, d: usize) -> usize {
        (h * self.width + w) * self.depth + d
    }

    /// Inverse of [`Shape::index`].
    #[inline]
    pub fn position(&self, index: usize) -> (usize, usize, usize) {
        let d = index % self.depth;
        let rest = index / self.depth;
        (rest / self.width, rest % self.width, d)
    }

    /// Centre voxel, `(height / 2, width / 2, depth / 2)`.
    #[inline]
    pub fn center(&self) -> (usize, usize, usize) {
        (self.height / 2, self.width / 2, self.depth / 2)
    }

    /// Fail with [`DeconvError::EmptyAxis`] if any axis is zero.
    pub fn ensure_non_empty(&self) -> Result<(), DeconvError> {
        if self.is_empty() {
            return Err(DeconvError::EmptyAxis(*self));
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.depth)
    }
}

/// A 3D array of real samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Vec<f32>,
    shape: Shape,
}

impl Volume {
    /// Wrap `data` as a volume of the given shape.
    pub fn new(shape: Shape, data: Vec<f32>) -> Result<Self, DeconvError> {
        if data.len() != shape.len() {
            return Err(DeconvError::LengthMismatch {
                shape,
                expected: shape.len(),
                actual: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    pub fn zeros(shape: Shape) -> Self {
        Self::filled(shape, 0.0)
    }

    pub fn filled(shape: Shape, value: f32) -> Self {
        Self {
            data: vec![value; shape.len()],
            shape,
        }
    }

    /// Build a volume by evaluating `f(h, w, d)` at every voxel.
    pub fn from_fn<F>(shape: Shape, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(shape.len());
        for h in 0..shape.height {
            for w in 0..shape.width {
                for d in 0..shape.depth {
                    data.push(f(h, w, d));
                }
            }
        }
        Self { data, shape }
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn get(&self, h: usize, w: usize, d: usize) -> f32 {
        self.data[self.shape.index(h, w, d)]
    }

    #[inline]
    pub fn set(&mut self, h: usize, w: usize, d: usize, value: f32) {
        let idx = self.shape.index(h, w, d);
        self.data[idx] = value;
    }

    /// Sum of all samples, accumulated in f64.
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }

    /// Mean sample value, 0 for an empty volume.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        (self.sum() / self.data.len() as f64) as f32
    }

    /// Largest sample value.
    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Position of the largest sample (first one on ties).
    pub fn argmax(&self) -> (usize, usize, usize) {
        let mut best = 0;
        for (i, &v) in self.data.iter().enumerate() {
            if v > self.data[best] {
                best = i;
            }
        }
        self.shape.position(best)
    }

    /// First sample that is negative or not finite.
    pub fn find_invalid(&self) -> Option<(usize, f32)> {
        self.data
            .iter()
            .copied()
            .enumerate()
            .find(|&(_, v)| !v.is_finite() || v < 0.0)
    }
}
