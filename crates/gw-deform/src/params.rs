use gw_core::Error;

/// Kernel geometry of a (deformable) 2-D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeformConvParams {
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub stride_w: usize,
    pub stride_h: usize,
    pub dilation_w: usize,
    pub dilation_h: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
}

impl Default for DeformConvParams {
    fn default() -> Self {
        Self::square(3, 1, 1, 0)
    }
}

impl DeformConvParams {
    pub fn square(kernel: usize, stride: usize, dilation: usize, pad: usize) -> Self {
        Self {
            kernel_w: kernel,
            kernel_h: kernel,
            stride_w: stride,
            stride_h: stride,
            dilation_w: dilation,
            dilation_h: dilation,
            pad_left: pad,
            pad_right: pad,
            pad_top: pad,
            pad_bottom: pad,
        }
    }

    /// Number of kernel taps, `kernel_h * kernel_w`.
    pub fn taps(&self) -> usize {
        self.kernel_h * self.kernel_w
    }

    pub fn validate(&self) -> Result<(), Error> {
        let checks = [
            ("kernel width", self.kernel_w),
            ("kernel height", self.kernel_h),
            ("stride width", self.stride_w),
            ("stride height", self.stride_h),
            ("dilation width", self.dilation_w),
            ("dilation height", self.dilation_h),
        ];
        for (name, v) in checks {
            if v == 0 {
                return Err(Error::InvalidParam { name, value: 0 });
            }
        }
        Ok(())
    }

    /// Output `(width, height)` for an input of `(w, h)`.
    pub fn out_size(&self, w: usize, h: usize) -> Result<(usize, usize), Error> {
        self.validate()?;
        let overflow = Error::Unsupported("convolution geometry overflows usize");
        let extent_w = extent(self.dilation_w, self.kernel_w).ok_or(overflow.clone())?;
        let extent_h = extent(self.dilation_h, self.kernel_h).ok_or(overflow.clone())?;
        let padded_w = w
            .checked_add(self.pad_left)
            .and_then(|v| v.checked_add(self.pad_right))
            .ok_or(overflow.clone())?;
        let padded_h = h
            .checked_add(self.pad_top)
            .and_then(|v| v.checked_add(self.pad_bottom))
            .ok_or(overflow)?;
        if padded_w < extent_w || padded_h < extent_h {
            return Err(Error::Unsupported("kernel extent exceeds padded input"));
        }
        Ok((
            (padded_w - extent_w) / self.stride_w + 1,
            (padded_h - extent_h) / self.stride_h + 1,
        ))
    }
}

/// Dilated kernel extent, `dilation * (kernel - 1) + 1`.
fn extent(dilation: usize, kernel: usize) -> Option<usize> {
    dilation.checked_mul(kernel - 1)?.checked_add(1)
}
