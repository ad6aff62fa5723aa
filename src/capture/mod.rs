//! Screen capture domain — public API.
//!
//! This module owns everything needed to photograph a paginated viewer
//! window: AppleScript window automation, region screenshots, and the
//! page loop that walks a book from `start` to `end`. External code
//! should only use the types and functions exported here.

mod screen;
pub mod window;

pub use screen::{capture_region, Region};
pub use window::{find_window, list_windows, WindowInfo};

use crate::worker::WorkerHandle;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Settle time after raising the target window, before the screenshot.
const FOCUS_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default)]
pub struct Margins {
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
}

impl Margins {
    /// Shrink a window rect by the margins, failing when nothing is left.
    fn apply(&self, win: &WindowInfo) -> Result<Region> {
        let width = win.width - self.left - self.right;
        let height = win.height - self.top - self.bottom;
        if width <= 0 || height <= 0 {
            bail!(
                "margins ({},{},{},{}) consume the whole {}x{} window",
                self.top,
                self.bottom,
                self.left,
                self.right,
                win.width,
                win.height
            );
        }
        Ok(Region {
            x: win.x + self.left,
            y: win.y + self.top,
            width: width as u32,
            height: height as u32,
        })
    }
}

/// One capture job: page range, naming template and window target.
/// Immutable once the loop starts.
#[derive(Debug, Clone)]
pub struct CapturePlan {
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    /// Book directory the page PNGs land in.
    pub output_dir: PathBuf,
    /// Output file prefix: pages are named `{title}_{page:0pad}.png`.
    pub title: String,
    pub start: u32,
    pub end: u32,
    /// Key sent to advance the viewer; `None` disables page turning.
    pub next_key: Option<String>,
    /// Delay after each page turn.
    pub delay: Duration,
    pub margins: Margins,
    /// Resize the window to this size before capturing.
    pub resize: Option<(u32, u32)>,
}

#[derive(Debug, Default)]
pub struct CaptureReport {
    pub captured: usize,
}

/// Walk the viewer from `start` to `end`, saving one PNG per page.
///
/// Per page: worker checkpoint → raise the window → settle → screenshot →
/// page-turn key (except after the last page) → delay. A failed page turn
/// is a warning; a failed activation or screenshot is fatal.
pub fn capture_pages(plan: &CapturePlan, worker: &WorkerHandle) -> Result<CaptureReport> {
    if plan.start > plan.end {
        bail!(
            "start page {} is beyond end page {}",
            plan.start,
            plan.end
        );
    }
    std::fs::create_dir_all(&plan.output_dir)
        .with_context(|| format!("failed to create {}", plan.output_dir.display()))?;

    let mut win = find_window(plan.app_name.as_deref(), plan.window_title.as_deref())?;
    log::info!(
        "[CAPTURE] Target window: [{}] {} ({},{}) {}x{}",
        win.app,
        win.title,
        win.x,
        win.y,
        win.width,
        win.height
    );

    if let Some((width, height)) = plan.resize {
        window::resize(&win.app, &win.title, width, height)?;
        // Geometry changed; look the window up again.
        win = find_window(Some(&win.app), Some(&win.title))?;
    }

    let region = plan.margins.apply(&win)?;
    let pad = plan.end.to_string().len();
    let start = Instant::now();
    let mut report = CaptureReport::default();

    for page in plan.start..=plan.end {
        worker.checkpoint()?;

        window::activate(Some(&win.app), Some(&win.title))
            .with_context(|| format!("failed to focus [{}] {}", win.app, win.title))?;
        std::thread::sleep(FOCUS_SETTLE);

        let output = plan
            .output_dir
            .join(format!("{}_{:0pad$}.png", plan.title, page, pad = pad));
        log::info!("[CAPTURE] Capturing page {}...", page);
        capture_region(&region, &output)
            .with_context(|| format!("failed to capture page {}", page))?;
        report.captured += 1;

        if page < plan.end {
            if let Some(key) = &plan.next_key {
                if let Err(err) = window::send_key(key) {
                    log::warn!("[CAPTURE] Failed to send next-page key '{}': {}", key, err);
                }
                if !plan.delay.is_zero() {
                    std::thread::sleep(plan.delay);
                }
            }
        }
    }

    log::info!(
        "[CAPTURE] Captured {} page(s) in {}ms",
        report.captured,
        start.elapsed().as_millis()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(width: i32, height: i32) -> WindowInfo {
        WindowInfo {
            app: "Preview".to_string(),
            title: "book.pdf".to_string(),
            x: 100,
            y: 200,
            width,
            height,
        }
    }

    #[test]
    fn margins_shrink_the_window_rect() {
        let margins = Margins {
            top: 50,
            bottom: 55,
            left: 10,
            right: 20,
        };
        let region = margins.apply(&window(1280, 960)).unwrap();
        assert_eq!(region.x, 110);
        assert_eq!(region.y, 250);
        assert_eq!(region.width, 1250);
        assert_eq!(region.height, 855);
    }

    #[test]
    fn oversized_margins_fail() {
        let margins = Margins {
            top: 500,
            bottom: 500,
            ..Default::default()
        };
        assert!(margins.apply(&window(1280, 960)).is_err());
    }
}
