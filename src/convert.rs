//! Pixel-format conversion into the session's target format.
//!
//! Every input is first expanded into an intermediate RGB scratch buffer and
//! then packed into the target format. The scratch buffer survives between
//! conversions, so [`ImageConverter::pre_allocate`] lets acquisition start pay
//! the allocation instead of the first captured frame.

use tracing::debug;

use crate::error::{CameraError, Result};
use crate::traits::{BufferView, CapturedFrame, PixelFormat};

const COLOR_OUTPUTS: [PixelFormat; 4] = [
    PixelFormat::Rgb8,
    PixelFormat::Bgr8,
    PixelFormat::Rgba8,
    PixelFormat::Bgra8,
];

/// Converts filled buffers into owned frames.
#[derive(Debug, Default)]
pub struct ImageConverter {
    scratch: Vec<u8>,
    prepared: Option<(PixelFormat, PixelFormat, u32, u32)>,
}

impl ImageConverter {
    /// Create a converter with no conversion buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Output formats reachable from `input`.
    pub fn supported_outputs(input: PixelFormat) -> Vec<PixelFormat> {
        match input {
            PixelFormat::Mono12p => Vec::new(),
            PixelFormat::Mono8 | PixelFormat::Mono10 | PixelFormat::Mono12 => {
                let mut outputs = vec![PixelFormat::Mono8];
                outputs.extend(COLOR_OUTPUTS);
                outputs
            }
            _ => COLOR_OUTPUTS.to_vec(),
        }
    }

    /// Whether `input` can be converted into `output`.
    pub fn supports(input: PixelFormat, output: PixelFormat) -> bool {
        Self::supported_outputs(input).contains(&output)
    }

    /// Reserve conversion buffers for a `width` x `height` frame.
    pub fn pre_allocate(
        &mut self,
        input: PixelFormat,
        output: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if !Self::supports(input, output) {
            return Err(CameraError::ConversionUnsupported {
                input,
                target: output,
            });
        }
        let needed = width as usize * height as usize * 3;
        self.scratch.reserve(needed.saturating_sub(self.scratch.len()));
        self.prepared = Some((input, output, width, height));
        debug!(%input, %output, width, height, "pre-allocated conversion buffers");
        Ok(())
    }

    /// Conversion the buffers were last prepared for.
    pub const fn prepared(&self) -> Option<(PixelFormat, PixelFormat, u32, u32)> {
        self.prepared
    }

    /// Copy a filled buffer into an owned frame in `target` format.
    pub fn convert(&mut self, view: &BufferView<'_>, target: PixelFormat) -> Result<CapturedFrame> {
        let input = view.pixel_format;
        if !Self::supports(input, target) {
            return Err(CameraError::ConversionUnsupported { input, target });
        }

        let expected = input.payload_size(view.width, view.height);
        let data = view.data.get(..expected).ok_or_else(|| {
            CameraError::Conversion(format!(
                "{input} {}x{} needs {expected} bytes, buffer holds {}",
                view.width,
                view.height,
                view.data.len()
            ))
        })?;

        self.scratch.clear();
        decode_rgb(data, input, view.width, view.height, &mut self.scratch)?;

        let mut out = Vec::with_capacity(target.payload_size(view.width, view.height));
        for rgb in self.scratch.chunks_exact(3) {
            if let &[r, g, b] = rgb {
                match target {
                    PixelFormat::Mono8 => out.push(r),
                    PixelFormat::Rgb8 => out.extend_from_slice(&[r, g, b]),
                    PixelFormat::Bgr8 => out.extend_from_slice(&[b, g, r]),
                    PixelFormat::Rgba8 => out.extend_from_slice(&[r, g, b, 255]),
                    PixelFormat::Bgra8 => out.extend_from_slice(&[b, g, r, 255]),
                    _ => return Err(CameraError::ConversionUnsupported { input, target }),
                }
            }
        }

        Ok(CapturedFrame {
            data: out,
            width: view.width,
            height: view.height,
            pixel_format: target,
            frame_id: view.frame_id,
            timestamp: view.timestamp,
        })
    }
}

/// Expand `data` into RGB triples.
fn decode_rgb(
    data: &[u8],
    input: PixelFormat,
    width: u32,
    height: u32,
    rgb: &mut Vec<u8>,
) -> Result<()> {
    match input {
        PixelFormat::Mono8 => {
            for &v in data {
                rgb.extend_from_slice(&[v, v, v]);
            }
        }
        PixelFormat::Mono10 | PixelFormat::Mono12 => {
            let shift = if input == PixelFormat::Mono10 { 2 } else { 4 };
            for word in data.chunks_exact(2) {
                if let &[lo, hi] = word {
                    let wide = u16::from_le_bytes([lo, hi]) >> shift;
                    let v = u8::try_from(wide).unwrap_or(u8::MAX);
                    rgb.extend_from_slice(&[v, v, v]);
                }
            }
        }
        PixelFormat::Rgb8 => rgb.extend_from_slice(data),
        PixelFormat::Bgr8 => {
            for px in data.chunks_exact(3) {
                if let &[b, g, r] = px {
                    rgb.extend_from_slice(&[r, g, b]);
                }
            }
        }
        PixelFormat::Rgba8 | PixelFormat::Bgra8 => {
            let swap = input == PixelFormat::Bgra8;
            for px in data.chunks_exact(4) {
                if let &[a, g, c, _] = px {
                    let (r, b) = if swap { (c, a) } else { (a, c) };
                    rgb.extend_from_slice(&[r, g, b]);
                }
            }
        }
        PixelFormat::Yuv422 => {
            // [Y0 U Y1 V] repeats; each pair of pixels shares U and V
            for quad in data.chunks_exact(4) {
                if let &[y0, u, y1, v] = quad {
                    let (r, g, b) = yuv_to_rgb(y0, u, v);
                    rgb.extend_from_slice(&[r, g, b]);
                    let (r, g, b) = yuv_to_rgb(y1, u, v);
                    rgb.extend_from_slice(&[r, g, b]);
                }
            }
        }
        PixelFormat::BayerRG8 => demosaic_rggb(data, width, height, rgb),
        PixelFormat::Mono12p => {
            return Err(CameraError::Conversion(
                "packed Mono12p input is not supported".to_owned(),
            ))
        }
    }
    Ok(())
}

/// Nearest-cell demosaicing: every pixel takes the colours of its 2x2 RGGB cell.
fn demosaic_rggb(data: &[u8], width: u32, height: u32, rgb: &mut Vec<u8>) {
    let w = width as usize;
    let h = height as usize;
    let at = |x: usize, y: usize| -> u8 {
        let x = x.min(w.saturating_sub(1));
        let y = y.min(h.saturating_sub(1));
        data.get(y * w + x).copied().unwrap_or(0)
    };

    for y in 0..h {
        for x in 0..w {
            let cx = x & !1;
            let cy = y & !1;
            let r = at(cx, cy);
            let g = at(cx + 1, cy).midpoint(at(cx, cy + 1));
            let b = at(cx + 1, cy + 1);
            rgb.extend_from_slice(&[r, g, b]);
        }
    }
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

/// Inverse of [`yuv_to_rgb`].
#[must_use]
#[allow(clippy::many_single_char_names)]
pub(crate) fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));

    let y = 0.114f32.mul_add(b, 0.587f32.mul_add(g, 0.299 * r));
    let u = 0.564f32.mul_add(b - y, 128.0);
    let v = 0.713f32.mul_add(r - y, 128.0);

    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_u8(val: f32) -> u8 {
    val.round().clamp(0.0, 255.0) as u8
}
