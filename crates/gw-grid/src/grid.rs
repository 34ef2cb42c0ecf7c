use gw_core::{Error, normalize};

/// Normalized sampling coordinates, one `(x, y)` pair per output pixel.
///
/// Stored row-major with the pair interleaved: shape `(height, width, 2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Grid {
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self, Error> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(2))
            .ok_or(Error::SizeMismatch {
                expected: usize::MAX,
                actual: data.len(),
            })?;

        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> [f32; 2]) -> Self {
        let mut data = Vec::with_capacity(width * height * 2);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn as_view(&self) -> GridView<'_> {
        GridView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GridView<'a> {
    width: usize,
    height: usize,
    data: &'a [f32],
}

impl<'a> GridView<'a> {
    pub fn from_slice(width: usize, height: usize, data: &'a [f32]) -> Result<Self, Error> {
        let expected = width * height * 2;
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Interleaved `(x, y)` pairs of row `y`.
    pub fn row(&self, y: usize) -> &'a [f32] {
        assert!(y < self.height, "row index out of bounds");
        let len = self.width * 2;
        &self.data[y * len..(y + 1) * len]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<[f32; 2]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y * self.width + x) * 2;
        Some([self.data[idx], self.data[idx + 1]])
    }
}

/// Grid whose samples land exactly on the pixel centers of a
/// `width x height` source.
pub fn identity_grid(width: usize, height: usize, align_corners: bool) -> Grid {
    Grid::from_fn(width, height, |x, y| {
        [
            normalize(x as f32, width, align_corners),
            normalize(y as f32, height, align_corners),
        ]
    })
}

/// Applies a 2x3 affine matrix to the identity grid.
///
/// Row-major `theta` maps normalized output coordinates `(x, y, 1)` to
/// normalized source coordinates.
pub fn affine_grid(theta: &[[f32; 3]; 2], width: usize, height: usize, align_corners: bool) -> Grid {
    Grid::from_fn(width, height, |x, y| {
        let nx = normalize(x as f32, width, align_corners);
        let ny = normalize(y as f32, height, align_corners);
        [
            theta[0][0] * nx + theta[0][1] * ny + theta[0][2],
            theta[1][0] * nx + theta[1][1] * ny + theta[1][2],
        ]
    })
}
