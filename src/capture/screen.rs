//! Region screenshots via xcap.
//!
//! Window geometry from System Events is in logical points; the captured
//! frame is physical pixels. The crop rect is scaled by the ratio between
//! the two before cutting, then clamped to the frame.

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use std::path::Path;
use xcap::Monitor;

/// A capture rect in logical (desktop) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Capture `region` from the monitor that contains its origin and write a
/// PNG to `output`.
pub fn capture_region(region: &Region, output: &Path) -> Result<()> {
    if region.width == 0 || region.height == 0 {
        bail!("invalid capture dimensions {}x{}", region.width, region.height);
    }

    let monitors = Monitor::all().context("failed to enumerate monitors")?;
    if monitors.is_empty() {
        bail!("no monitors found");
    }
    let monitor = pick_monitor(&monitors, region);

    let mon_x = monitor.x().context("monitor origin unavailable")?;
    let mon_y = monitor.y().context("monitor origin unavailable")?;
    let mon_width = monitor.width().context("monitor size unavailable")?;

    let frame = monitor.capture_image().context(
        "failed to capture screen — on macOS, grant Screen Recording permission to \
         your terminal in System Settings > Privacy & Security",
    )?;
    let frame = DynamicImage::ImageRgba8(frame);
    if frame.width() == 0 || frame.height() == 0 {
        bail!("captured an empty frame — possible permission issue");
    }

    // Logical points → physical pixels.
    let scale = frame.width() as f64 / mon_width.max(1) as f64;
    let px = (((region.x - mon_x) as f64) * scale).round().max(0.0) as u32;
    let py = (((region.y - mon_y) as f64) * scale).round().max(0.0) as u32;
    let pw = ((region.width as f64) * scale).round() as u32;
    let ph = ((region.height as f64) * scale).round() as u32;

    if px >= frame.width() || py >= frame.height() {
        bail!(
            "capture region ({},{}) {}x{} lies outside the monitor frame {}x{}",
            region.x,
            region.y,
            region.width,
            region.height,
            frame.width(),
            frame.height()
        );
    }
    let pw = pw.min(frame.width() - px);
    let ph = ph.min(frame.height() - py);
    if pw == 0 || ph == 0 {
        bail!("capture region collapsed to zero pixels after clamping");
    }

    let cropped = frame.crop_imm(px, py, pw, ph);
    cropped
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    log::debug!(
        "[CAPTURE] Saved {} ({}x{} px, scale {:.2})",
        output.display(),
        pw,
        ph,
        scale
    );
    Ok(())
}

/// Prefer the monitor whose bounds contain the region origin; fall back to
/// the first one.
fn pick_monitor<'a>(monitors: &'a [Monitor], region: &Region) -> &'a Monitor {
    monitors
        .iter()
        .find(|m| {
            let (Ok(x), Ok(y), Ok(w), Ok(h)) = (m.x(), m.y(), m.width(), m.height()) else {
                return false;
            };
            region.x >= x
                && region.y >= y
                && region.x < x + w as i32
                && region.y < y + h as i32
        })
        .unwrap_or(&monitors[0])
}
