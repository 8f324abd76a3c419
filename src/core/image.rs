use crate::core::models::Crop;
use image::imageops::{self, FilterType};
use image::{
    DynamicImage, GenericImageView, GrayImage, ImageBuffer, Luma, Rgba, RgbaImage, SubImage,
};

/// Luma weights (R, G, B), roughly BT.601, applied as an integer matrix.
const LUMA_WEIGHTS: [u32; 3] = [77, 151, 28];
const LUMA_DIVISOR: u32 = 256;

/// The single owned pixel buffer a thumbnail is rendered into:
/// 8-bit RGBA, alpha premultiplied into the colour channels.
pub struct PixelBuffer {
    pixels: RgbaImage,
}

impl PixelBuffer {
    /// Render a decoded image. Returns `None` when the buffer cannot be built
    /// from the rendered samples.
    pub fn render(img: &DynamicImage) -> Option<Self> {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut samples = rgba.into_raw();
        for px in samples.chunks_exact_mut(4) {
            let alpha = px[3] as u32;
            if alpha == 255 {
                continue;
            }
            for channel in &mut px[..3] {
                *channel = ((*channel as u32 * alpha + 127) / 255) as u8;
            }
        }

        let pixels = ImageBuffer::from_raw(width, height, samples)?;
        Some(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// A view of the centered region kept by `crop`. The view borrows the
    /// buffer; no pixels are copied.
    pub fn crop_view(&self, crop: Crop) -> CropView<'_> {
        let (x, y, width, height) = crop_rect(self.width(), self.height(), crop.percent());
        CropView {
            crop,
            view: self.pixels.view(x, y, width, height),
        }
    }
}

/// Centered sub-rectangle covering `percent` of each dimension, rounded down
/// and never smaller than 1x1. Returns `(x, y, width, height)`.
pub fn crop_rect(width: u32, height: u32, percent: u32) -> (u32, u32, u32, u32) {
    let scale = |dim: u32| ((dim as u64 * percent as u64 / 100) as u32).clamp(1, dim.max(1));
    let crop_width = scale(width);
    let crop_height = scale(height);
    (
        (width - crop_width) / 2,
        (height - crop_height) / 2,
        crop_width,
        crop_height,
    )
}

/// Non-owning window into a [`PixelBuffer`].
pub struct CropView<'a> {
    crop: Crop,
    view: SubImage<&'a RgbaImage>,
}

impl CropView<'_> {
    pub fn crop(&self) -> Crop {
        self.crop
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.view.dimensions()
    }

    /// Downscale the view to `width` x `height` and reduce it to luma.
    pub fn downscale_gray(&self, width: u32, height: u32) -> Option<GrayImage> {
        let scaled = imageops::resize(&*self.view, width, height, FilterType::Lanczos3);
        if scaled.dimensions() != (width, height) {
            return None;
        }
        Some(to_luma(&scaled))
    }
}

fn to_luma(img: &RgbaImage) -> GrayImage {
    let mut gray = GrayImage::new(img.width(), img.height());
    for (x, y, px) in img.enumerate_pixels() {
        gray.put_pixel(x, y, Luma([luma(px)]));
    }
    gray
}

fn luma(px: &Rgba<u8>) -> u8 {
    let [r, g, b, _] = px.0;
    let weighted =
        r as u32 * LUMA_WEIGHTS[0] + g as u32 * LUMA_WEIGHTS[1] + b as u32 * LUMA_WEIGHTS[2];
    (weighted / LUMA_DIVISOR) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_rect_rounds_down_and_centers() {
        assert_eq!(crop_rect(100, 50, 100), (0, 0, 100, 50));
        assert_eq!(crop_rect(100, 50, 90), (5, 2, 90, 45));
        assert_eq!(crop_rect(101, 7, 75), (13, 1, 75, 5));
    }

    #[test]
    fn test_crop_rect_minimum_one_pixel() {
        assert_eq!(crop_rect(1, 1, 75), (0, 0, 1, 1));
        assert_eq!(crop_rect(3, 1, 10), (1, 0, 1, 1));
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(&Rgba([255, 255, 255, 255])), 255);
        assert_eq!(luma(&Rgba([0, 0, 0, 255])), 0);
        assert_eq!(luma(&Rgba([255, 0, 0, 255])), 76);
        assert_eq!(luma(&Rgba([0, 255, 0, 255])), 150);
        assert_eq!(luma(&Rgba([0, 0, 255, 255])), 27);
    }

    #[test]
    fn test_render_premultiplies_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([200, 100, 50, 255])
            } else {
                Rgba([200, 100, 50, 0])
            }
        }));

        let buffer = PixelBuffer::render(&img).unwrap();
        assert_eq!(buffer.pixels.get_pixel(0, 0), &Rgba([200, 100, 50, 255]));
        assert_eq!(buffer.pixels.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_crop_views_share_buffer() {
        let img =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 20, Rgba([10, 20, 30, 255])));
        let buffer = PixelBuffer::render(&img).unwrap();

        let full = buffer.crop_view(Crop::Full);
        let center90 = buffer.crop_view(Crop::Center90);
        let center75 = buffer.crop_view(Crop::Center75);

        assert_eq!(full.dimensions(), (40, 20));
        assert_eq!(center90.dimensions(), (36, 18));
        assert_eq!(center75.dimensions(), (30, 15));

        let gray = center75.downscale_gray(9, 8).unwrap();
        assert_eq!(gray.dimensions(), (9, 8));
    }
}
