//! Image preprocessing for the X-ray classifier

use std::io::Cursor;

use anyhow::Result;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

use crate::config::TensorLayout;

/// Decode image from bytes, optionally honouring the EXIF orientation tag
pub fn decode_image(data: &[u8], apply_exif: bool) -> Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    if apply_exif {
        Ok(apply_exif_orientation(data, image))
    } else {
        Ok(image)
    }
}

/// Read the EXIF orientation tag, 1 (normal) when absent
fn exif_orientation(data: &[u8]) -> u32 {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()
        .and_then(|exif_data| {
            let field = exif_data.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
            field.value.get_uint(0)
        })
        .unwrap_or(1)
}

/// Scanners and phone captures may store rotation in EXIF instead of pixels.
/// See https://exiftool.org/TagNames/EXIF.html (Orientation)
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    match exif_orientation(data) {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Shape of the input tensor for a square image of edge `size`
pub fn input_shape(size: u32, layout: TensorLayout) -> (usize, usize, usize, usize) {
    let s = size as usize;
    match layout {
        TensorLayout::Nhwc => (1, s, s, 3),
        TensorLayout::Nchw => (1, 3, s, s),
    }
}

/// Preprocess a decoded X-ray for the classifier.
///
/// Grayscale scans are expanded to RGB, resized to `size x size` with
/// nearest-neighbour sampling and scaled to [0, 1].
pub fn preprocess_for_classification(
    image: &DynamicImage,
    size: u32,
    layout: TensorLayout,
) -> Array4<f32> {
    let resized = image.resize_exact(size, size, FilterType::Nearest);
    let rgb = resized.to_rgb8();

    let mut tensor = Array4::<f32>::zeros(input_shape(size, layout));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};

    fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_decode_png_without_exif() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, Rgb([10, 20, 30])));
        let decoded = decode_image(&encode_png(&img), true).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 2));
    }

    /// JPEG whose APP1 segment carries Orientation = 6 (rotate 90° CW)
    fn jpeg_with_orientation_6(image: &DynamicImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
        let jpeg = buffer.into_inner();

        #[rustfmt::skip]
        let app1: [u8; 36] = [
            0xFF, 0xE1, 0x00, 0x22,
            b'E', b'x', b'i', b'f', 0x00, 0x00,
            // Big-endian TIFF header, IFD0 at offset 8
            b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08,
            // One entry: Orientation (0x0112), SHORT, count 1, value 6
            0x00, 0x01,
            0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x06, 0x00, 0x00,
            // No next IFD
            0x00, 0x00, 0x00, 0x00,
        ];

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_exif_orientation_is_opt_in() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, Rgb([120, 120, 120])));
        let data = jpeg_with_orientation_6(&img);
        assert_eq!(exif_orientation(&data), 6);

        let stored = decode_image(&data, false).unwrap();
        assert_eq!((stored.width(), stored.height()), (4, 2));

        let rotated = decode_image(&data, true).unwrap();
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_image(b"definitely not an image", false).unwrap_err();
        assert!(err.downcast_ref::<image::ImageError>().is_some());
    }

    #[test]
    fn test_nhwc_shape_and_scaling() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([255, 0, 51])));
        let tensor = preprocess_for_classification(&img, 8, TensorLayout::Nhwc);

        assert_eq!(tensor.shape(), &[1, 8, 8, 3]);
        assert!((tensor[[0, 3, 5, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 3, 5, 1]].abs() < 1e-6);
        assert!((tensor[[0, 3, 5, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_nchw_layout_puts_channels_first() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 255, 0])));
        let tensor = preprocess_for_classification(&img, 6, TensorLayout::Nchw);

        assert_eq!(tensor.shape(), &[1, 3, 6, 6]);
        assert!(tensor[[0, 0, 2, 2]].abs() < 1e-6);
        assert!((tensor[[0, 1, 2, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_grayscale_expands_to_three_channels() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, Luma([102])));
        let tensor = preprocess_for_classification(&img, 3, TensorLayout::Nhwc);

        for c in 0..3 {
            assert!((tensor[[0, 1, 1, c]] - 0.4).abs() < 1e-6);
        }
    }

    #[test]
    fn test_nearest_resize_keeps_hard_edges() {
        // Left half black, right half white
        let mut img = RgbImage::new(4, 4);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            *pixel = if x < 2 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) };
        }
        let tensor =
            preprocess_for_classification(&DynamicImage::ImageRgb8(img), 8, TensorLayout::Nhwc);

        for value in tensor.iter() {
            assert!(*value == 0.0 || *value == 1.0);
        }
    }
}
