//! 16-bit frame to RGB24 conversion for the live view

use super::settings::ViewSettings;
use crate::capture::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Sample value to grey level, for every possible sample.
pub fn tone_curve(settings: &ViewSettings) -> Vec<u8> {
    let dark = settings.dark_threshold();
    let gamma = settings.gamma();
    (0..=u16::MAX)
        .map(|sample| {
            let value = ((f64::from(sample) - dark) / 65535.0).clamp(0.0, 1.0);
            (value.powf(gamma) * 255.0) as u8
        })
        .collect()
}

/// Render `frame` as packed RGB24 rows (`width * 3` bytes each).
///
/// When zoomed, the centre row and column are drawn red as an alignment aid.
pub fn render_rgb24(frame: &Frame, settings: &ViewSettings) -> Vec<u8> {
    let curve = tone_curve(settings);
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let crosshair = settings.zoom().is_some();

    let mut rgb = Vec::with_capacity(width * height * 3);
    for (y, row) in frame.pixels().chunks_exact(width).enumerate() {
        for (x, sample) in row.iter().enumerate() {
            let grey = curve[usize::from(*sample)];
            let red = if crosshair && (y == height / 2 || x == width / 2) {
                u8::MAX
            } else {
                grey
            };
            rgb.extend_from_slice(&[red, grey, grey]);
        }
    }
    rgb
}

/// Part of the frame to show. `None` shows the whole frame.
///
/// The margin shrinks the frame on every side, vertically in proportion to
/// the aspect ratio. It is capped so at least one pixel remains.
pub fn source_rect(width: u32, height: u32, zoom: Option<u32>) -> Option<Rect> {
    let margin = zoom?.min(width.saturating_sub(1) / 2);
    let y_margin = (u64::from(margin) * u64::from(height) / u64::from(width.max(1))) as u32;

    Some(Rect {
        x: margin,
        y: y_margin,
        width: width - 2 * margin,
        height: height.saturating_sub(2 * y_margin).max(1),
    })
}

/// Largest aspect-preserving rectangle anchored top-left in the window.
pub fn dest_rect(width: u32, height: u32, window_width: u32, window_height: u32) -> Rect {
    let width = width.max(1);
    let fit_width = u64::from(window_height) * u64::from(width) / u64::from(height.max(1));
    let dest_width = u64::from(window_width).min(fit_width);
    let dest_height = dest_width * u64::from(height) / u64::from(width);

    Rect {
        x: 0,
        y: 0,
        width: dest_width as u32,
        height: dest_height as u32,
    }
}
