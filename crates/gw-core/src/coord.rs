use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
    #[default]
    Bilinear,
    Nearest,
    Bicubic,
}

impl TryFrom<i32> for ResizeMode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Bilinear),
            2 => Ok(Self::Nearest),
            3 => Ok(Self::Bicubic),
            _ => Err(Error::InvalidParam {
                name: "resize type",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingMode {
    #[default]
    Zero,
    Border,
    Reflection,
}

impl TryFrom<i32> for PaddingMode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Zero),
            2 => Ok(Self::Border),
            3 => Ok(Self::Reflection),
            _ => Err(Error::InvalidParam {
                name: "padding mode",
                value,
            }),
        }
    }
}

/// Maps a normalized coordinate in `[-1, 1]` to a source-space coordinate.
///
/// With `align_corners` the extremes land on the centers of the first and
/// last pixels. Without it they land half a pixel outside, on the image edge.
#[inline]
pub fn denormalize(coord: f32, size: usize, align_corners: bool) -> f32 {
    let size = size as f32;
    if align_corners {
        (coord + 1.0) / 2.0 * (size - 1.0)
    } else {
        ((coord + 1.0) * size - 1.0) / 2.0
    }
}

/// Inverse of [`denormalize`].
#[inline]
pub fn normalize(pixel: f32, size: usize, align_corners: bool) -> f32 {
    let size = size as f32;
    if align_corners {
        if size <= 1.0 {
            return 0.0;
        }
        pixel * 2.0 / (size - 1.0) - 1.0
    } else {
        (pixel * 2.0 + 1.0) / size - 1.0
    }
}

/// Clamps to `[0, size - 1]`. NaN maps to 0.
#[inline]
pub fn clip_coord(coord: f32, size: usize) -> f32 {
    let hi = size.saturating_sub(1) as f32;
    coord.max(0.0).min(hi)
}

/// Folds `coord` into `[twice_low / 2, twice_high / 2]` by triangle-wave
/// reflection.
///
/// Bounds are passed doubled so that half-pixel spans stay integral.
pub fn reflect_coord(coord: f32, twice_low: i64, twice_high: i64) -> f32 {
    if twice_low == twice_high {
        return 0.0;
    }

    let min = twice_low as f32 / 2.0;
    let span = (twice_high - twice_low) as f32 / 2.0;
    let coord = (coord - min).abs();
    let extra = coord % span;
    let flips = (coord / span).floor();

    if flips % 2.0 == 0.0 {
        extra + min
    } else {
        span - extra + min
    }
}

/// Applies the boundary policy to an already denormalized coordinate.
///
/// `Zero` leaves the coordinate untouched; the sampler drops out-of-range
/// taps instead.
pub fn apply_padding(coord: f32, size: usize, mode: PaddingMode, align_corners: bool) -> f32 {
    match mode {
        PaddingMode::Zero => coord,
        PaddingMode::Border => clip_coord(coord, size),
        PaddingMode::Reflection => {
            let size_i = size as i64;
            let reflected = if align_corners {
                reflect_coord(coord, 0, 2 * (size_i - 1))
            } else {
                reflect_coord(coord, -1, 2 * size_i - 1)
            };
            clip_coord(reflected, size)
        }
    }
}

#[inline]
pub fn source_index(coord: f32, size: usize, mode: PaddingMode, align_corners: bool) -> f32 {
    apply_padding(denormalize(coord, size, align_corners), size, mode, align_corners)
}

#[cfg(test)]
mod tests {
    use super::{
        PaddingMode, ResizeMode, apply_padding, denormalize, normalize, reflect_coord,
        source_index,
    };
    use crate::Error;

    #[test]
    fn denormalize_extremes() {
        assert!((denormalize(-1.0, 5, true) - 0.0).abs() < 1e-6);
        assert!((denormalize(1.0, 5, true) - 4.0).abs() < 1e-6);
        assert!((denormalize(-1.0, 5, false) + 0.5).abs() < 1e-6);
        assert!((denormalize(1.0, 5, false) - 4.5).abs() < 1e-6);
        assert!((denormalize(0.0, 2, false) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn denormalize_is_monotonic() {
        for size in [1usize, 2, 3, 7, 64] {
            for align in [true, false] {
                let mut prev = f32::NEG_INFINITY;
                for step in 0..=200 {
                    let c = -3.0 + step as f32 * 0.03;
                    let v = denormalize(c, size, align);
                    assert!(v >= prev, "size={size} align={align} c={c}");
                    prev = v;
                }
            }
        }
    }

    #[test]
    fn normalize_inverts_denormalize() {
        for size in [2usize, 3, 10] {
            for align in [true, false] {
                for px in 0..size {
                    let n = normalize(px as f32, size, align);
                    let back = denormalize(n, size, align);
                    assert!((back - px as f32).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn border_stays_in_range_for_far_inputs() {
        for size in [2usize, 3, 17] {
            for c in [-1e9f32, -100.0, -1.5, -1.0, 0.3, 1.0, 2.5, 1e9] {
                for align in [true, false] {
                    let v = source_index(c, size, PaddingMode::Border, align);
                    assert!((0.0..=(size - 1) as f32).contains(&v), "c={c} -> {v}");
                }
            }
        }
    }

    #[test]
    fn border_and_reflection_are_finite_for_non_finite_input() {
        for c in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            for mode in [PaddingMode::Border, PaddingMode::Reflection] {
                let v = apply_padding(c, 4, mode, false);
                assert!(v.is_finite());
                assert!((0.0..=3.0).contains(&v));
            }
        }
    }

    #[test]
    fn reflection_for_size_one_is_zero() {
        for c in [-50.0f32, -1.0, -0.3, 0.0, 0.7, 1.0, 9.0] {
            for align in [true, false] {
                let v = source_index(c, 1, PaddingMode::Reflection, align);
                assert_eq!(v, 0.0);
            }
        }
    }

    #[test]
    fn reflection_folds_aligned_span() {
        // span [0, 4] in pixel units for size 5
        let cases = [
            (-1.0, 1.0),
            (-2.5, 2.5),
            (0.0, 0.0),
            (4.0, 4.0),
            (5.0, 3.0),
            (7.5, 0.5),
            (9.0, 1.0),
        ];
        for (input, expected) in cases {
            let v = apply_padding(input, 5, PaddingMode::Reflection, true);
            assert!((v - expected).abs() < 1e-5, "{input} -> {v}");
        }
    }

    #[test]
    fn reflection_folds_half_pixel_span() {
        // span [-0.5, 3.5] for size 4, then clipped to [0, 3]
        assert!((apply_padding(-1.0, 4, PaddingMode::Reflection, false) - 0.0).abs() < 1e-6);
        assert!((apply_padding(-1.5, 4, PaddingMode::Reflection, false) - 0.5).abs() < 1e-6);
        assert!((apply_padding(4.0, 4, PaddingMode::Reflection, false) - 3.0).abs() < 1e-6);
        assert!((apply_padding(4.5, 4, PaddingMode::Reflection, false) - 2.5).abs() < 1e-6);
        assert!((reflect_coord(2.0, -1, 7) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn zero_padding_leaves_coordinate() {
        assert_eq!(apply_padding(-7.25, 3, PaddingMode::Zero, true), -7.25);
        assert_eq!(apply_padding(12.0, 3, PaddingMode::Zero, false), 12.0);
    }

    #[test]
    fn integer_modes_parse_and_reject() {
        assert_eq!(ResizeMode::try_from(1), Ok(ResizeMode::Bilinear));
        assert_eq!(ResizeMode::try_from(2), Ok(ResizeMode::Nearest));
        assert_eq!(ResizeMode::try_from(3), Ok(ResizeMode::Bicubic));
        assert_eq!(PaddingMode::try_from(3), Ok(PaddingMode::Reflection));

        assert_eq!(
            ResizeMode::try_from(0),
            Err(Error::InvalidParam {
                name: "resize type",
                value: 0
            })
        );
        assert_eq!(
            PaddingMode::try_from(4),
            Err(Error::InvalidParam {
                name: "padding mode",
                value: 4
            })
        );
    }
}
