/// Borrowed view of a single-channel intensity image.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

/// Borrowed view of a binary mask co-registered with a gray image.
///
/// Any non-zero byte is foreground. The detection pipeline treats printed
/// ink (annulus rings, code dots) as foreground.
#[derive(Clone, Copy, Debug)]
pub struct BinaryImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8],
}

/// Foreground coverage classification of a mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskCoverage {
    Empty,
    Full,
    Mixed,
}

impl<'a> BinaryImageView<'a> {
    /// Foreground test with out-of-bounds reading as background.
    #[inline]
    pub fn is_set(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return false;
        }
        self.data[y as usize * self.width + x as usize] != 0
    }

    /// Classify the mask as all-background, all-foreground or mixed.
    pub fn coverage(&self) -> MaskCoverage {
        let mut any_set = false;
        let mut any_clear = false;
        for &v in self.data {
            if v != 0 {
                any_set = true;
            } else {
                any_clear = true;
            }
            if any_set && any_clear {
                return MaskCoverage::Mixed;
            }
        }
        if any_set {
            MaskCoverage::Full
        } else {
            MaskCoverage::Empty
        }
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

/// Bilinear sample at a sub-pixel location. Out-of-bounds taps read as 0.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_gray(src, x0, y0) as f64;
    let p10 = get_gray(src, x0 + 1, y0) as f64;
    let p01 = get_gray(src, x0, y0 + 1) as f64;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}
