//! Reconcile a kernel's size with the data volume it will be applied to.
//!
//! Each axis is handled independently: a short axis is zero padded, a long
//! axis is cropped. The size difference `diff = target - kernel` is split
//! into a `low` and a `high` amount with `low = target / 2 - kernel / 2`.
//! For odd kernel lengths that is `ceil(diff / 2)`, for even lengths
//! `floor(diff / 2)`, and in both cases kernel sample `kernel / 2` ends up
//! on output sample `target / 2`, which is where the re-centering shift of
//! the transform operators expects the kernel origin.

use super::{DeconvError, Shape, Volume};

/// Signed amounts added on the low and high side of one axis.
///
/// Negative amounts are samples trimmed from that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSplit {
    pub low: isize,
    pub high: isize,
}

impl AxisSplit {
    /// Split for a kernel axis of `kernel_len` samples reconciled to `target_len`.
    pub fn new(kernel_len: usize, target_len: usize) -> Self {
        let diff = target_len as isize - kernel_len as isize;
        let low = (target_len / 2) as isize - (kernel_len / 2) as isize;
        Self {
            low,
            high: diff - low,
        }
    }

    /// Kernel sample that lands on output sample `i`, if any.
    #[inline]
    fn source(&self, i: usize, kernel_len: usize) -> Option<usize> {
        let src = i as isize - self.low;
        (src >= 0 && (src as usize) < kernel_len).then_some(src as usize)
    }
}

/// Per-axis splits for reconciling `kernel` to `target`, outermost axis first.
pub fn axis_splits(kernel: Shape, target: Shape) -> [AxisSplit; 3] {
    let k = kernel.dims();
    let t = target.dims();
    [
        AxisSplit::new(k[0], t[0]),
        AxisSplit::new(k[1], t[1]),
        AxisSplit::new(k[2], t[2]),
    ]
}

/// Return a copy of `kernel` padded and/or cropped to exactly `target`.
pub fn pad_or_crop(kernel: &Volume, target: Shape) -> Result<Volume, DeconvError> {
    let kshape = kernel.shape();
    kshape.ensure_non_empty()?;
    target.ensure_non_empty()?;

    if kshape == target {
        return Ok(kernel.clone());
    }

    let [split_h, split_w, split_d] = axis_splits(kshape, target);
    log::debug!(
        "Reconciling kernel {} to {}: splits h={:?} w={:?} d={:?}",
        kshape,
        target,
        split_h,
        split_w,
        split_d
    );

    let mut out = Volume::zeros(target);
    let src = kernel.as_slice();
    let dst = out.as_mut_slice();

    for h in 0..target.height {
        let Some(sh) = split_h.source(h, kshape.height) else {
            continue;
        };
        for w in 0..target.width {
            let Some(sw) = split_w.source(w, kshape.width) else {
                continue;
            };
            for d in 0..target.depth {
                if let Some(sd) = split_d.source(d, kshape.depth) {
                    dst[target.index(h, w, d)] = src[kshape.index(sh, sw, sd)];
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ramp(shape: Shape) -> Volume {
        let mut i = 0.0;
        Volume::from_fn(shape, |_, _, _| {
            i += 1.0;
            i
        })
    }

    #[test]
    fn test_axis_split_rules() {
        // Odd kernel, odd mismatch: extra padding on the low side.
        assert_eq!(AxisSplit::new(3, 16), AxisSplit { low: 7, high: 6 });
        // Even kernel, odd mismatch: extra padding on the high side.
        assert_eq!(AxisSplit::new(4, 15), AxisSplit { low: 5, high: 6 });
        // Even mismatch is symmetric.
        assert_eq!(AxisSplit::new(3, 9), AxisSplit { low: 3, high: 3 });
        // Cropping an odd kernel by one trims the high side.
        assert_eq!(AxisSplit::new(5, 4), AxisSplit { low: 0, high: -1 });
        // Cropping an even kernel by three trims two from the low side.
        assert_eq!(AxisSplit::new(6, 3), AxisSplit { low: -2, high: -1 });
        assert_eq!(AxisSplit::new(7, 7), AxisSplit { low: 0, high: 0 });
    }

    #[test]
    fn test_pad_enlarges() {
        let kernel = Volume::filled(Shape::new(3, 3, 3), 1.0);
        let padded = pad_or_crop(&kernel, Shape::new(16, 16, 8)).unwrap();

        assert_eq!(padded.shape(), Shape::new(16, 16, 8));
        assert!((padded.sum() - 27.0).abs() < 1e-9);
        // Block occupies [7, 9] x [7, 9] x [3, 5].
        assert_eq!(padded.get(7, 7, 3), 1.0);
        assert_eq!(padded.get(9, 9, 5), 1.0);
        assert_eq!(padded.get(6, 8, 4), 0.0);
        assert_eq!(padded.get(8, 8, 6), 0.0);
    }

    #[test]
    fn test_crop_shrinks() {
        let kernel = ramp(Shape::new(7, 6, 5));
        let cropped = pad_or_crop(&kernel, Shape::new(3, 3, 3)).unwrap();

        assert_eq!(cropped.shape(), Shape::new(3, 3, 3));
        // Centres coincide: kernel (3, 3, 2) -> output (1, 1, 1).
        assert_eq!(cropped.get(1, 1, 1), kernel.get(3, 3, 2));
        // Height crops 2 from each side, width 2 low / 1 high, depth 1 each.
        assert_eq!(cropped.get(0, 0, 0), kernel.get(2, 2, 1));
        assert_eq!(cropped.get(2, 2, 2), kernel.get(4, 4, 3));
    }

    #[test]
    fn test_mixed_pad_and_crop() {
        let kernel = ramp(Shape::new(5, 2, 4));
        let out = pad_or_crop(&kernel, Shape::new(4, 5, 4)).unwrap();

        assert_eq!(out.shape(), Shape::new(4, 5, 4));
        assert_eq!(out.get(2, 2, 2), kernel.get(2, 1, 2));
        // Width padded 1 low / 2 high.
        assert_eq!(out.get(0, 0, 0), 0.0);
        assert_eq!(out.get(0, 1, 0), kernel.get(0, 0, 0));
        assert_eq!(out.get(0, 3, 0), 0.0);
    }

    #[test]
    fn test_identity_when_shapes_match() {
        let kernel = ramp(Shape::new(4, 3, 2));
        let out = pad_or_crop(&kernel, kernel.shape()).unwrap();
        assert_eq!(out, kernel);
    }

    #[test]
    fn test_zero_axis_is_rejected() {
        let kernel = Volume::filled(Shape::new(3, 3, 3), 1.0);
        assert!(matches!(
            pad_or_crop(&kernel, Shape::new(8, 0, 8)),
            Err(DeconvError::EmptyAxis(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_output_matches_target(
            kh in 1usize..8, kw in 1usize..8, kd in 1usize..8,
            th in 1usize..12, tw in 1usize..12, td in 1usize..12,
        ) {
            let kernel = ramp(Shape::new(kh, kw, kd));
            let target = Shape::new(th, tw, td);
            let out = pad_or_crop(&kernel, target).unwrap();

            prop_assert_eq!(out.shape(), target);

            let (ch, cw, cd) = target.center();
            let (kch, kcw, kcd) = kernel.shape().center();
            prop_assert_eq!(out.get(ch, cw, cd), kernel.get(kch, kcw, kcd));

            // Padding never invents mass; cropping only removes it.
            prop_assert!(out.sum() <= kernel.sum() + 1e-6);
            if th >= kh && tw >= kw && td >= kd {
                prop_assert!((out.sum() - kernel.sum()).abs() < 1e-6);
            }
        }
    }
}
