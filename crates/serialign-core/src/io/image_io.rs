use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use image::{GrayImage, ImageFormat, Luma};
use ndarray::Array2;

use crate::error::{Result, SerialignError};
use crate::field::finite_mean;

const RAW_MAGIC: &[u8; 4] = b"SRAW";

/// Save a grayscale image as 16-bit TIFF.
///
/// Out-of-domain pixels are replaced with the image's finite mean so the
/// file carries no infinities.
pub fn save_tiff(image: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = image.dim();
    let fill = finite_mean(image);

    let mut pixels: Vec<u16> = Vec::with_capacity(h * w);
    for row in 0..h {
        for col in 0..w {
            let v = image[[row, col]];
            let v = if v.is_finite() { v } else { fill };
            pixels.push((v.clamp(0.0, 1.0) * 65535.0) as u16);
        }
    }

    let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .expect("buffer size matches dimensions");
    img.save(path)?;
    Ok(())
}

/// Save a grayscale image as 8-bit PNG.
pub fn save_png(image: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = image.dim();
    let fill = finite_mean(image);

    let mut img = GrayImage::new(w as u32, h as u32);
    for row in 0..h {
        for col in 0..w {
            let v = image[[row, col]];
            let v = if v.is_finite() { v } else { fill };
            img.put_pixel(col as u32, row as u32, Luma([(v.clamp(0.0, 1.0) * 255.0) as u8]));
        }
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save an image, choosing format from the file extension.
pub fn save_image(image: &Array2<f32>, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(image, path),
        _ => save_tiff(image, path),
    }
}

/// Save a float array verbatim: no normalization, no sentinel replacement.
/// Little-endian, shape header first.
pub fn save_raw(image: &Array2<f32>, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(RAW_MAGIC)?;
    let (ny, nx) = image.dim();
    writer.write_u32::<LittleEndian>(ny as u32)?;
    writer.write_u32::<LittleEndian>(nx as u32)?;
    for &v in image.iter() {
        writer.write_f32::<LittleEndian>(v)?;
    }
    writer.flush()?;
    Ok(())
}

/// Load a float array written by [`save_raw`].
pub fn load_raw(path: &Path) -> Result<Array2<f32>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != RAW_MAGIC {
        return Err(SerialignError::InvalidRawFile(format!(
            "bad magic in {}",
            path.display()
        )));
    }
    let ny = reader.read_u32::<LittleEndian>()? as usize;
    let nx = reader.read_u32::<LittleEndian>()? as usize;
    let mut samples = Vec::with_capacity(ny * nx);
    for _ in 0..ny * nx {
        samples.push(reader.read_f32::<LittleEndian>()?);
    }
    Array2::from_shape_vec((ny, nx), samples)
        .map_err(|e| SerialignError::InvalidRawFile(e.to_string()))
}

/// Load a grayscale image file, normalized to `[0, 1]`.
pub fn load_image(path: &Path) -> Result<Array2<f32>> {
    let img = image::open(path)?;
    let gray = img.to_luma16();
    let (w, h) = gray.dimensions();
    let mut data = Array2::<f32>::zeros((h as usize, w as usize));

    for row in 0..h as usize {
        for col in 0..w as usize {
            let pixel = gray.get_pixel(col as u32, row as u32);
            data[[row, col]] = pixel.0[0] as f32 / 65535.0;
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip_preserves_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.raw");

        let mut image = Array2::<f32>::from_elem((3, 5), 0.5);
        image[[1, 2]] = f32::INFINITY;
        save_raw(&image, &path).unwrap();
        let loaded = load_raw(&path).unwrap();
        assert_eq!(loaded.dim(), (3, 5));
        assert!(loaded[[1, 2]].is_infinite());
        assert_eq!(loaded[[0, 0]], 0.5);
    }

    #[test]
    fn png_round_trip_quantizes_to_8_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradient.png");

        let mut image = Array2::<f32>::zeros((4, 8));
        for (i, v) in image.iter_mut().enumerate() {
            *v = i as f32 / 31.0;
        }
        save_png(&image, &path).unwrap();
        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.dim(), image.dim());
        for (a, b) in loaded.iter().zip(image.iter()) {
            assert!((a - b).abs() < 1.0 / 255.0 + 1e-6);
        }
    }
}
