use rayon::prelude::*;

use crate::Error;
use crate::exec::Allocator;

/// Logical shape of a feature map plus its packing.
///
/// `channels` counts logical channels; they are stored in
/// `channels / elempack` groups, each group interleaving `elempack` lanes
/// per spatial element. `depth == 0` marks a 3-D map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub channels: usize,
    pub depth: usize,
    pub height: usize,
    pub width: usize,
    pub elempack: usize,
}

impl Shape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            depth: 0,
            height,
            width,
            elempack: 1,
        }
    }

    pub fn new_3d(channels: usize, depth: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            depth,
            height,
            width,
            elempack: 1,
        }
    }

    pub fn packed(self, elempack: usize) -> Self {
        Self { elempack, ..self }
    }

    pub fn dims(&self) -> usize {
        if self.depth == 0 { 3 } else { 4 }
    }

    pub fn groups(&self) -> usize {
        self.channels / self.elempack.max(1)
    }

    /// Elements in one channel group.
    pub fn plane_len(&self) -> usize {
        self.depth.max(1) * self.height * self.width * self.elempack
    }

    pub fn len(&self) -> usize {
        self.groups() * self.plane_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(group, lane)` of logical channel `c`.
    #[inline]
    pub fn locate(&self, c: usize) -> (usize, usize) {
        (c / self.elempack, c % self.elempack)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.elempack == 0 || !self.elempack.is_power_of_two() {
            return Err(Error::InvalidPack {
                elempack: self.elempack,
            });
        }
        if !self.channels.is_multiple_of(self.elempack) {
            return Err(Error::InvalidPack {
                elempack: self.elempack,
            });
        }
        checked_len(self).map(|_| ())
    }
}

fn checked_len(shape: &Shape) -> Result<usize, Error> {
    shape
        .depth
        .max(1)
        .checked_mul(shape.height)
        .and_then(|v| v.checked_mul(shape.width))
        .and_then(|v| v.checked_mul(shape.channels))
        .ok_or(Error::Allocation { len: usize::MAX })
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    shape: Shape,
    data: Vec<f32>,
}

impl FeatureMap {
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> Result<Self, Error> {
        shape.validate()?;
        let expected = shape.len();
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Zero-filled map obtained from `allocator`.
    pub fn zeros_in(shape: Shape, allocator: &dyn Allocator) -> Result<Self, Error> {
        shape.validate()?;
        let data = allocator.alloc_zeroed(shape.len())?;
        Ok(Self { shape, data })
    }

    /// Builds an unpacked map from a `(c, y, x)` generator.
    pub fn from_fn(
        channels: usize,
        height: usize,
        width: usize,
        mut f: impl FnMut(usize, usize, usize) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(channels * height * width);
        for c in 0..channels {
            for y in 0..height {
                for x in 0..width {
                    data.push(f(c, y, x));
                }
            }
        }
        Self {
            shape: Shape::new(channels, height, width),
            data,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn width(&self) -> usize {
        self.shape.width
    }

    pub fn height(&self) -> usize {
        self.shape.height
    }

    pub fn channels(&self) -> usize {
        self.shape.channels
    }

    pub fn elempack(&self) -> usize {
        self.shape.elempack
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn as_view(&self) -> FeatureView<'_> {
        FeatureView {
            shape: self.shape,
            data: &self.data,
        }
    }

    pub fn as_view_mut(&mut self) -> FeatureViewMut<'_> {
        FeatureViewMut {
            shape: self.shape,
            data: &mut self.data,
        }
    }

    /// Re-lays the map out with a different pack width.
    pub fn repack(&self, elempack: usize) -> Result<FeatureMap, Error> {
        let src = self.shape;
        let dst_shape = src.packed(elempack);
        dst_shape.validate()?;

        if elempack == src.elempack {
            return Ok(self.clone());
        }

        let spatial = src.depth.max(1) * src.height * src.width;
        let mut data = vec![0.0f32; dst_shape.len()];
        for c in 0..src.channels {
            let (sg, sl) = src.locate(c);
            let (dg, dl) = dst_shape.locate(c);
            let src_plane = &self.data[sg * src.plane_len()..(sg + 1) * src.plane_len()];
            let dst_plane = &mut data[dg * dst_shape.plane_len()..(dg + 1) * dst_shape.plane_len()];
            for i in 0..spatial {
                dst_plane[i * elempack + dl] = src_plane[i * src.elempack + sl];
            }
        }

        Ok(FeatureMap {
            shape: dst_shape,
            data,
        })
    }
}

/// One channel group of a 2-D map.
#[derive(Debug, Clone, Copy)]
pub struct PlaneView<'a> {
    width: usize,
    height: usize,
    elempack: usize,
    data: &'a [f32],
}

impl<'a> PlaneView<'a> {
    pub fn from_slice(
        width: usize,
        height: usize,
        elempack: usize,
        data: &'a [f32],
    ) -> Result<Self, Error> {
        let expected = width * height * elempack;
        if data.len() < expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            elempack,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn elempack(&self) -> usize {
        self.elempack
    }

    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    pub fn row(&self, y: usize) -> &'a [f32] {
        assert!(y < self.height, "row index out of bounds");
        let len = self.width * self.elempack;
        &self.data[y * len..(y + 1) * len]
    }

    /// All lanes of the element at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Option<&'a [f32]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y * self.width + x) * self.elempack;
        self.data.get(start..start + self.elempack)
    }

    /// Lanes starting at linear element index `idx` (`y * width + x`).
    ///
    /// # Safety
    /// Caller must guarantee `idx < width * height`.
    #[inline]
    pub unsafe fn lanes_unchecked(&self, idx: usize) -> &'a [f32] {
        let start = idx * self.elempack;
        // SAFETY: Caller guarantees `idx` is a valid element index; the
        // constructor checked `data.len() >= width * height * elempack`.
        unsafe { self.data.get_unchecked(start..start + self.elempack) }
    }
}

#[derive(Debug)]
pub struct PlaneViewMut<'a> {
    width: usize,
    height: usize,
    elempack: usize,
    data: &'a mut [f32],
}

impl<'a> PlaneViewMut<'a> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn elempack(&self) -> usize {
        self.elempack
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [f32] {
        assert!(y < self.height, "row index out of bounds");
        let len = self.width * self.elempack;
        &mut self.data[y * len..(y + 1) * len]
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut *self.data
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureView<'a> {
    shape: Shape,
    data: &'a [f32],
}

impl<'a> FeatureView<'a> {
    pub fn from_slice(shape: Shape, data: &'a [f32]) -> Result<Self, Error> {
        shape.validate()?;
        let expected = shape.len();
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn width(&self) -> usize {
        self.shape.width
    }

    pub fn height(&self) -> usize {
        self.shape.height
    }

    pub fn channels(&self) -> usize {
        self.shape.channels
    }

    pub fn elempack(&self) -> usize {
        self.shape.elempack
    }

    pub fn groups(&self) -> usize {
        self.shape.groups()
    }

    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    /// Depth slice `z` of channel group `g`.
    pub fn plane(&self, g: usize, z: usize) -> PlaneView<'a> {
        assert!(g < self.groups(), "channel group out of bounds");
        assert!(z < self.shape.depth.max(1), "depth index out of bounds");
        let slice_len = self.shape.height * self.shape.width * self.shape.elempack;
        let start = g * self.shape.plane_len() + z * slice_len;
        PlaneView {
            width: self.shape.width,
            height: self.shape.height,
            elempack: self.shape.elempack,
            data: &self.data[start..start + slice_len],
        }
    }

    pub fn channel(&self, g: usize) -> PlaneView<'a> {
        self.plane(g, 0)
    }

    /// Scalar of logical channel `c` at `(x, y)` of a 2-D map.
    #[inline]
    pub fn scalar(&self, c: usize, x: usize, y: usize) -> f32 {
        let (g, lane) = self.shape.locate(c);
        let idx = g * self.shape.plane_len()
            + (y * self.shape.width + x) * self.shape.elempack
            + lane;
        self.data[idx]
    }
}

#[derive(Debug)]
pub struct FeatureViewMut<'a> {
    shape: Shape,
    data: &'a mut [f32],
}

impl<'a> FeatureViewMut<'a> {
    pub fn from_slice_mut(shape: Shape, data: &'a mut [f32]) -> Result<Self, Error> {
        shape.validate()?;
        let expected = shape.len();
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_view(&self) -> FeatureView<'_> {
        FeatureView {
            shape: self.shape,
            data: &*self.data,
        }
    }

    pub fn channel_mut(&mut self, g: usize) -> PlaneViewMut<'_> {
        assert!(g < self.shape.groups(), "channel group out of bounds");
        let len = self.shape.plane_len();
        PlaneViewMut {
            width: self.shape.width,
            height: self.shape.height,
            elempack: self.shape.elempack,
            data: &mut self.data[g * len..(g + 1) * len],
        }
    }

    /// Channel groups as disjoint mutable planes, for parallel fan-out.
    pub fn par_channels_mut(&mut self) -> impl IndexedParallelIterator<Item = PlaneViewMut<'_>> {
        let Shape {
            width,
            height,
            elempack,
            ..
        } = self.shape;
        let len = self.shape.plane_len().max(1);
        self.data
            .par_chunks_mut(len)
            .map(move |data| PlaneViewMut {
                width,
                height,
                elempack,
                data,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureMap, FeatureView, PlaneView, Shape};
    use crate::Error;
    use crate::exec::BoundedAllocator;

    #[test]
    fn shape_rejects_bad_packing() {
        assert_eq!(
            Shape::new(4, 2, 2).packed(3).validate(),
            Err(Error::InvalidPack { elempack: 3 })
        );
        assert_eq!(
            Shape::new(6, 2, 2).packed(4).validate(),
            Err(Error::InvalidPack { elempack: 4 })
        );
        assert!(Shape::new(8, 2, 2).packed(4).validate().is_ok());
    }

    #[test]
    fn shape_overflow_is_an_allocation_error() {
        let s = Shape::new(2, usize::MAX / 2, 3);
        assert_eq!(s.validate(), Err(Error::Allocation { len: usize::MAX }));
        assert_eq!(s.validate().map_err(|e| e.status()), Err(-100));
    }

    #[test]
    fn from_vec_checks_length() {
        let err = FeatureMap::from_vec(Shape::new(2, 2, 2), vec![0.0; 7]);
        assert_eq!(
            err,
            Err(Error::SizeMismatch {
                expected: 8,
                actual: 7
            })
        );
    }

    #[test]
    fn locate_splits_group_and_lane() {
        let s = Shape::new(16, 1, 1).packed(4);
        assert_eq!(s.locate(0), (0, 0));
        assert_eq!(s.locate(5), (1, 1));
        assert_eq!(s.locate(15), (3, 3));
        assert_eq!(s.groups(), 4);
    }

    #[test]
    fn repack_preserves_logical_values() {
        let map = FeatureMap::from_fn(8, 2, 3, |c, y, x| (c * 100 + y * 10 + x) as f32);
        let packed = map.repack(4).expect("8 channels pack by 4");
        assert_eq!(packed.shape().groups(), 2);

        let pv = packed.as_view();
        let uv = map.as_view();
        for c in 0..8 {
            for y in 0..2 {
                for x in 0..3 {
                    assert_eq!(pv.scalar(c, x, y), uv.scalar(c, x, y));
                }
            }
        }

        // lane-interleaved: first element holds channels 0..4 at (0, 0)
        assert_eq!(&packed.data()[0..4], &[0.0, 100.0, 200.0, 300.0]);

        let back = packed.repack(1).expect("unpack");
        assert_eq!(back, map);
    }

    #[test]
    fn plane_rows_and_pixels() {
        let map = FeatureMap::from_fn(4, 2, 2, |c, y, x| (c * 10 + y * 2 + x) as f32)
            .repack(2)
            .expect("pack by 2");
        let view = map.as_view();
        let plane = view.channel(1);

        assert_eq!(plane.row(0), &[20.0, 30.0, 21.0, 31.0]);
        assert_eq!(plane.pixel(1, 1), Some(&[23.0, 33.0][..]));
        assert_eq!(plane.pixel(2, 0), None);
    }

    #[test]
    fn zeros_in_surfaces_allocation_failure() {
        let alloc = BoundedAllocator::new(10);
        let err = FeatureMap::zeros_in(Shape::new(3, 2, 2), &alloc);
        assert_eq!(err, Err(Error::Allocation { len: 12 }));
    }

    #[test]
    fn view_from_slice_and_plane_view() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let view = FeatureView::from_slice(Shape::new(1, 2, 2), &data).expect("valid view");
        assert_eq!(view.channel(0).row(1), &[3.0, 4.0]);

        let plane = PlaneView::from_slice(2, 2, 1, &data).expect("valid plane");
        assert_eq!(plane.pixel(0, 1), Some(&[3.0][..]));
        assert!(PlaneView::from_slice(3, 2, 1, &data).is_err());
    }
}
