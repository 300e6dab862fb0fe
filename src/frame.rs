//! Decoded video frames on their way to the encoder
//!
//! A [`Frame`] is owned by exactly one stage at a time: the source hands it over
//! to the sink by value, and the sink drops it once it has been written.

pub use imgref::{ImgRef, ImgVec};
pub use rgb::RGBA8;

use crate::error::CatResult;

/// One decoded raster image
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in decode order, starting at 0
    pub index: usize,
    /// Pixels, in RGBA. Video frames are normally fully opaque.
    pub image: ImgVec<RGBA8>,
}

impl Frame {
    #[inline]
    pub fn new(index: usize, image: ImgVec<RGBA8>) -> Self {
        Self { index, image }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.image.height()
    }

    /// Scales the frame down to fit the max size (if any), and makes transparency binary,
    /// since GIF can't do anything else.
    pub(crate) fn prepared(self, width: Option<u32>, height: Option<u32>) -> CatResult<Self> {
        let Self { index, mut image } = self;
        let (dst_width, dst_height) = dimensions_for_image((image.width(), image.height()), (width, height));

        if dst_width != image.width() || dst_height != image.height() {
            let (buf, img_width, img_height) = image.into_contiguous_buf();
            let mut r = resize::new(img_width, img_height, dst_width, dst_height, resize::Pixel::RGBA8, resize::Type::Lanczos3)?;
            let mut dst = vec![RGBA8::new(0, 0, 0, 0); dst_width * dst_height];
            r.resize(&buf, &mut dst)?;
            image = ImgVec::new(dst, dst_width, dst_height);
        }

        const DITHER: [u8; 64] = [
         0*2+8,48*2+8,12*2+8,60*2+8, 3*2+8,51*2+8,15*2+8,63*2+8,
        32*2+8,16*2+8,44*2+8,28*2+8,35*2+8,19*2+8,47*2+8,31*2+8,
         8*2+8,56*2+8, 4*2+8,52*2+8,11*2+8,59*2+8, 7*2+8,55*2+8,
        40*2+8,24*2+8,36*2+8,20*2+8,43*2+8,27*2+8,39*2+8,23*2+8,
         2*2+8,50*2+8,14*2+8,62*2+8, 1*2+8,49*2+8,13*2+8,61*2+8,
        34*2+8,18*2+8,46*2+8,30*2+8,33*2+8,17*2+8,45*2+8,29*2+8,
        10*2+8,58*2+8, 6*2+8,54*2+8, 9*2+8,57*2+8, 5*2+8,53*2+8,
        42*2+8,26*2+8,38*2+8,22*2+8,41*2+8,25*2+8,37*2+8,21*2+8];

        // Make transparency binary
        for (y, row) in image.rows_mut().enumerate() {
            for (x, px) in row.iter_mut().enumerate() {
                if px.a < 255 {
                    px.a = if px.a < DITHER[(y & 7) * 8 + (x & 7)] { 0 } else { 255 };
                }
            }
        }
        Ok(Self { index, image })
    }
}

/// The `Option` args are user-specified max width and max height.
/// Images are never enlarged. Width alone keeps the aspect ratio, both stretch.
pub(crate) fn dimensions_for_image((img_w, img_h): (usize, usize), resize_to: (Option<u32>, Option<u32>)) -> (usize, usize) {
    match resize_to {
        (None, None) => (img_w, img_h),
        (Some(w), Some(h)) => {
            ((w as usize).min(img_w).max(1), (h as usize).min(img_h).max(1))
        },
        (Some(w), None) => {
            let w = (w as usize).min(img_w).max(1);
            (w, (img_h * w / img_w).max(1))
        },
        (None, Some(h)) => {
            let h = (h as usize).min(img_h).max(1);
            ((img_w * h / img_h).max(1), h)
        },
    }
}
