use crate::map::PlaneView;

/// Bilinear weights and in-range corner indices for one source coordinate.
///
/// Corners are ordered `(x0, y0), (x1, y0), (x0, y1), (x1, y1)`. A corner
/// outside the plane has no index and contributes nothing, which is what
/// zero padding means. The tap is computed once and then applied to every
/// lane of every channel group that shares the coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilinearTap {
    pub corners: [Option<usize>; 4],
    pub weights: [f32; 4],
}

impl BilinearTap {
    pub const EMPTY: Self = Self {
        corners: [None; 4],
        weights: [0.0; 4],
    };

    pub fn new(x: f32, y: f32, width: usize, height: usize) -> Self {
        if !x.is_finite() || !y.is_finite() {
            return Self::EMPTY;
        }

        let x0 = x.floor() as isize;
        let y0 = y.floor() as isize;
        let x1 = x0.saturating_add(1);
        let y1 = y0.saturating_add(1);

        let a1 = x - x0 as f32;
        let a0 = 1.0 - a1;
        let b1 = y - y0 as f32;
        let b0 = 1.0 - b1;

        let at = |ix: isize, iy: isize| -> Option<usize> {
            if ix < 0 || iy < 0 || ix >= width as isize || iy >= height as isize {
                None
            } else {
                Some(iy as usize * width + ix as usize)
            }
        };

        Self {
            corners: [at(x0, y0), at(x1, y0), at(x0, y1), at(x1, y1)],
            weights: [a0 * b0, a1 * b0, a0 * b1, a1 * b1],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.corners.iter().all(Option::is_none)
    }

    /// Writes `sum(w_k * v_k)` for every lane of `plane` into `out`.
    ///
    /// `out.len()` must equal `plane.elempack()`.
    #[inline]
    pub fn gather(&self, plane: &PlaneView<'_>, out: &mut [f32]) {
        debug_assert_eq!(out.len(), plane.elempack());
        out.fill(0.0);

        let ep = plane.elempack();
        let data = plane.data();
        for (corner, &w) in self.corners.iter().zip(&self.weights) {
            let Some(idx) = *corner else {
                continue;
            };
            let Some(lanes) = data.get(idx * ep..(idx + 1) * ep) else {
                continue;
            };
            for (o, &v) in out.iter_mut().zip(lanes) {
                *o += w * v;
            }
        }
    }
}

/// Bilinear sample of the first lane at source-space `(x, y)`.
///
/// Out-of-range corners are dropped, so a coordinate with no corner inside
/// the plane yields exactly `0.0`.
pub fn sample_bilinear(plane: &PlaneView<'_>, x: f32, y: f32) -> f32 {
    let tap = BilinearTap::new(x, y, plane.width(), plane.height());
    let ep = plane.elempack();
    let data = plane.data();

    let mut acc = 0.0f32;
    for (corner, &w) in tap.corners.iter().zip(&tap.weights) {
        if let Some(idx) = *corner {
            acc += w * data[idx * ep];
        }
    }
    acc
}

pub fn sample_bilinear_lanes(plane: &PlaneView<'_>, x: f32, y: f32, out: &mut [f32]) {
    BilinearTap::new(x, y, plane.width(), plane.height()).gather(plane, out);
}

/// Nearest-pixel element index, rounding half to even. `None` when the
/// rounded pixel is outside the plane.
#[inline]
pub fn nearest_index(x: f32, y: f32, width: usize, height: usize) -> Option<usize> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let xi = x.round_ties_even() as isize;
    let yi = y.round_ties_even() as isize;
    if xi < 0 || yi < 0 || xi >= width as isize || yi >= height as isize {
        return None;
    }
    Some(yi as usize * width + xi as usize)
}

pub fn sample_nearest(plane: &PlaneView<'_>, x: f32, y: f32) -> f32 {
    match nearest_index(x, y, plane.width(), plane.height()) {
        // SAFETY: `nearest_index` only returns indices in `[0, width * height)`.
        Some(idx) => unsafe { plane.lanes_unchecked(idx)[0] },
        None => 0.0,
    }
}

pub fn sample_nearest_lanes(plane: &PlaneView<'_>, x: f32, y: f32, out: &mut [f32]) {
    match nearest_index(x, y, plane.width(), plane.height()) {
        // SAFETY: `nearest_index` only returns indices in `[0, width * height)`.
        Some(idx) => out.copy_from_slice(unsafe { plane.lanes_unchecked(idx) }),
        None => out.fill(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BilinearTap, sample_bilinear, sample_bilinear_lanes, sample_nearest, sample_nearest_lanes,
    };
    use crate::map::{FeatureMap, PlaneView};

    fn plane_3x3() -> Vec<f32> {
        vec![
            0.0, 1.0, 2.0, // row 0
            10.0, 11.0, 12.0, // row 1
            20.0, 21.0, 22.0, // row 2
        ]
    }

    #[test]
    fn bilinear_exact_at_integer_coordinates() {
        let data = plane_3x3();
        let plane = PlaneView::from_slice(3, 3, 1, &data).expect("valid plane");

        for y in 0..3 {
            for x in 0..3 {
                let v = sample_bilinear(&plane, x as f32, y as f32);
                assert_eq!(v, data[y * 3 + x]);
            }
        }
    }

    #[test]
    fn bilinear_on_2x2_center() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let plane = PlaneView::from_slice(2, 2, 1, &data).expect("valid plane");
        assert!((sample_bilinear(&plane, 0.5, 0.5) - 2.5).abs() < 1e-6);
        assert!((sample_bilinear(&plane, 0.25, 0.0) - 1.25).abs() < 1e-6);
    }

    #[test]
    fn bilinear_drops_out_of_range_corners() {
        let data = vec![0.0f32, 10.0, 20.0, 30.0];
        let plane = PlaneView::from_slice(2, 2, 1, &data).expect("valid plane");

        // only (0, 0) is inside, with weight 0.75 * 0.75
        let v = sample_bilinear(&plane, -0.25, -0.25);
        assert!((v - 0.0).abs() < 1e-6);

        // only (1, 1) is inside, with weight 0.5 * 0.5
        let v = sample_bilinear(&plane, 1.5, 1.5);
        assert!((v - 7.5).abs() < 1e-6);
    }

    #[test]
    fn bilinear_all_corners_outside_is_zero() {
        let data = plane_3x3();
        let plane = PlaneView::from_slice(3, 3, 1, &data).expect("valid plane");

        for (x, y) in [(-2.5, 1.0), (1.0, -1.01), (3.0, 0.5), (10.0, 10.0), (-1e9, 1e9)] {
            assert_eq!(sample_bilinear(&plane, x, y), 0.0);
        }
        assert_eq!(sample_bilinear(&plane, f32::NAN, 0.0), 0.0);
        assert!(BilinearTap::new(-5.0, -5.0, 3, 3).is_empty());
    }

    #[test]
    fn tap_gather_broadcasts_across_lanes() {
        let map = FeatureMap::from_fn(4, 2, 2, |c, y, x| (c as f32 + 1.0) * (y * 2 + x) as f32)
            .repack(4)
            .expect("pack by 4");
        let view = map.as_view();
        let plane = view.channel(0);

        let mut out = [0.0f32; 4];
        sample_bilinear_lanes(&plane, 0.5, 0.5, &mut out);
        // mean of 0, 1, 2, 3 is 1.5, scaled by channel
        for (c, v) in out.iter().enumerate() {
            assert!((v - 1.5 * (c as f32 + 1.0)).abs() < 1e-5);
        }
    }

    #[test]
    fn nearest_rounds_and_zero_fills() {
        let data = plane_3x3();
        let plane = PlaneView::from_slice(3, 3, 1, &data).expect("valid plane");

        assert_eq!(sample_nearest(&plane, 1.2, 1.6), 21.0);
        assert_eq!(sample_nearest(&plane, 0.5, 0.5), 0.0);
        assert_eq!(sample_nearest(&plane, 1.5, 0.0), 2.0);
        assert_eq!(sample_nearest(&plane, -0.6, 1.0), 0.0);
        assert_eq!(sample_nearest(&plane, 2.4, 2.4), 22.0);

        let mut out = [7.0f32];
        sample_nearest_lanes(&plane, 5.0, 0.0, &mut out);
        assert_eq!(out, [0.0]);
    }
}
