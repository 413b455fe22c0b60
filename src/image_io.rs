//! PNG reading and writing for rasters.

use std::path::Path;

use image::{DynamicImage, GrayImage};
use ndarray::{Array2, ArrayD, Axis, Ix2, IxDyn};

use crate::error::{Error, Result};
use crate::raster::RasterMatrix;

/// Per-channel weights used to collapse RGB to a single luminance value.
const RGB_WEIGHTS: [f32; 3] = [0.33, 0.33, 0.33];

/// Reads an image as `(rows, cols)` for grayscale or `(rows, cols, 3)` for
/// RGB. Deeper samples (16-bit, float) are scaled down to 8 bits.
pub fn read_image(path: impl AsRef<Path>) -> Result<ArrayD<u8>> {
    let img = image::open(path.as_ref())?;
    let (width, height) = (img.width() as usize, img.height() as usize);

    let (shape, data) = match img {
        DynamicImage::ImageLuma8(buf) => (vec![height, width], buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => (vec![height, width, 3], buf.into_raw()),
        DynamicImage::ImageLuma16(_) => (vec![height, width], img.to_luma8().into_raw()),
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
            (vec![height, width, 3], img.to_rgb8().into_raw())
        }
        other => {
            let channels = other.color().channel_count() as usize;
            return Err(Error::Shape {
                shape: vec![height, width, channels],
            });
        }
    };

    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|_| Error::Shape { shape })
}

/// Collapses a grayscale or RGB array to one luminance plane.
pub fn to_luminance(image: ArrayD<u8>) -> Result<Array2<f32>> {
    let luminance = match image.shape() {
        [_, _] => image.mapv(f32::from),
        [_, _, 3] => image.map_axis(Axis(2), |px| {
            px.iter()
                .zip(RGB_WEIGHTS)
                .map(|(&v, w)| f32::from(v) * w)
                .sum::<f32>()
        }),
        shape => {
            return Err(Error::Shape {
                shape: shape.to_vec(),
            })
        }
    };

    let shape = luminance.shape().to_vec();
    luminance
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::Shape { shape })
}

/// Writes a raster as an 8-bit grayscale PNG, one pixel per cell.
pub fn write_image(path: impl AsRef<Path>, matrix: &RasterMatrix) -> Result<()> {
    let (rows, cols) = matrix.dim();
    let img = GrayImage::from_raw(cols as u32, rows as u32, matrix.iter().copied().collect())
        .ok_or_else(|| Error::Shape {
            shape: vec![rows, cols],
        })?;
    img.save(path.as_ref())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ON;
    use approx::assert_relative_eq;
    use image::{GrayAlphaImage, ImageBuffer, Luma, LumaA, Rgb, RgbImage};

    #[test]
    fn test_grayscale_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roll.png");

        let mut matrix = RasterMatrix::zeros((5, 7));
        matrix[[1, 2]] = ON;
        matrix[[4, 6]] = ON;
        write_image(&path, &matrix).unwrap();

        let image = read_image(&path).unwrap();
        assert_eq!(image.shape(), &[5, 7]);
        let luminance = to_luminance(image).unwrap();
        assert_eq!(luminance, matrix.mapv(f32::from));
    }

    #[test]
    fn test_rgb_is_collapsed_with_equal_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");

        let mut img = RgbImage::new(3, 2);
        img.put_pixel(1, 0, Rgb([255, 255, 255]));
        img.put_pixel(2, 1, Rgb([255, 0, 0]));
        img.save(&path).unwrap();

        let luminance = to_luminance(read_image(&path).unwrap()).unwrap();
        assert_eq!(luminance.dim(), (2, 3));
        assert_relative_eq!(luminance[[0, 1]], 252.45, epsilon = 1e-3);
        assert_relative_eq!(luminance[[1, 2]], 84.15, epsilon = 1e-3);
        assert_relative_eq!(luminance[[0, 0]], 0.0);
    }

    #[test]
    fn test_sixteen_bit_grayscale_is_scaled_to_eight_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.png");

        let mut img = ImageBuffer::<Luma<u16>, Vec<u16>>::new(4, 3);
        img.put_pixel(2, 1, Luma([u16::MAX]));
        img.save(&path).unwrap();

        let image = read_image(&path).unwrap();
        assert_eq!(image.shape(), &[3, 4]);
        let luminance = to_luminance(image).unwrap();
        assert_eq!(luminance[[1, 2]], 255.0);
        assert_eq!(luminance.iter().filter(|&&v| v > 0.0).count(), 1);
    }

    #[test]
    fn test_sixteen_bit_rgb_is_read_as_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep_rgb.png");

        let mut img = ImageBuffer::<Rgb<u16>, Vec<u16>>::new(2, 2);
        img.put_pixel(0, 1, Rgb([u16::MAX, u16::MAX, u16::MAX]));
        img.save(&path).unwrap();

        let image = read_image(&path).unwrap();
        assert_eq!(image.shape(), &[2, 2, 3]);
        let luminance = to_luminance(image).unwrap();
        assert_relative_eq!(luminance[[1, 0]], 252.45, epsilon = 1e-3);
    }

    #[test]
    fn test_unsupported_color_type_is_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpha.png");
        let mut img = GrayAlphaImage::new(2, 2);
        img.put_pixel(0, 0, LumaA([255, 255]));
        img.save(&path).unwrap();

        match read_image(&path) {
            Err(Error::Shape { shape }) => assert_eq!(shape, vec![2, 2, 2]),
            other => panic!("expected shape error, got {other:?}"),
        }
    }

    #[test]
    fn test_luminance_rejects_other_shapes() {
        let image = ArrayD::<u8>::zeros(IxDyn(&[2, 2, 4]));
        assert!(matches!(to_luminance(image), Err(Error::Shape { .. })));

        let image = ArrayD::<u8>::zeros(IxDyn(&[8]));
        assert!(matches!(to_luminance(image), Err(Error::Shape { .. })));
    }
}
