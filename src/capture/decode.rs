use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use super::frame::{image_data_size, PixelFormat};
use crate::error::{Error, Result};

/// Decodes a raw `width` x `height` frame into packed RGB24 in `out`.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let expected = image_data_size(width, height);
    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder.decode()?;
            let info = decoder
                .info()
                .ok_or_else(|| Error::UnsupportedFormat("JPEG without header".into()))?;
            if info.pixel_format != JpegPixelFormat::RGB24 {
                return Err(Error::UnsupportedFormat(format!(
                    "JPEG pixel format {:?}",
                    info.pixel_format
                )));
            }
            check_len(pixels.len(), expected)?;
            *out = pixels;
        }
        PixelFormat::Rgb24 => {
            // Already in RGB format
            check_len(data.len(), expected)?;
            out.clear();
            out.extend_from_slice(data);
        }
        PixelFormat::Yuyv4 => {
            check_len(data.len() / 2 * 3, expected)?;
            out.resize(expected, 0);
            yuyv_to_rgb(data, out);
        }
    }
    Ok(())
}

fn check_len(actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::BufferSize { expected, actual })
    }
}

/// BT.601 limited-range YUYV 4:2:2 to RGB24.
fn yuyv_to_rgb(yuyv: &[u8], rgb: &mut [u8]) {
    for (src, dst) in yuyv.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let u = src[1] as i32 - 128;
        let v = src[3] as i32 - 128;
        for (i, y) in [src[0], src[2]].into_iter().enumerate() {
            let c = 298 * (y as i32 - 16);
            let px = &mut dst[i * 3..i * 3 + 3];
            px[0] = clamp_u8((c + 409 * v + 128) >> 8);
            px[1] = clamp_u8((c - 100 * u - 208 * v + 128) >> 8);
            px[2] = clamp_u8((c + 516 * u + 128) >> 8);
        }
    }
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Copies the `eye_index`-th half of a side-by-side RGB24 frame into `dst`.
///
/// `width` is the per-eye width; the source frame is `2 * width` wide.
pub fn split_side_by_side(
    frame: &[u8],
    width: u32,
    height: u32,
    eye_index: usize,
    dst: &mut [u8],
) -> Result<()> {
    let row = width as usize * 3;
    check_len(dst.len(), row * height as usize)?;
    check_len(frame.len(), 2 * row * height as usize)?;

    for (src_row, dst_row) in frame.chunks_exact(2 * row).zip(dst.chunks_exact_mut(row)) {
        let start = eye_index * row;
        dst_row.copy_from_slice(&src_row[start..start + row]);
    }
    Ok(())
}
