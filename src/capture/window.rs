//! Window automation through the macOS scripting bridge (`osascript`).
//!
//! Enumeration, exact-match lookup, activation, resize and page-turn
//! keystrokes. Matching is exact and case-insensitive on the app name or
//! window title — no substring matching, so an ambiguous request fails
//! instead of capturing the wrong window.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

const LIST_TIMEOUT: Duration = Duration::from_secs(15);
const RESIZE_TIMEOUT: Duration = Duration::from_secs(10);
const KEY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("osascript not found — window capture requires macOS")]
    OsascriptMissing,
    #[error("AppleScript failed: {0}")]
    Script(String),
    #[error("osascript timed out after {0:?}")]
    Timeout(Duration),
    #[error("no window matched app={app:?} title={title:?} (exact, case-insensitive)")]
    NoMatch {
        app: Option<String>,
        title: Option<String>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One capturable window as reported by System Events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub app: String,
    pub title: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

// Enumerates visible windows as `proc|title|x|y|w|h` lines. Windows under
// 10x10 are decoration artifacts and are dropped at the source.
const LIST_WINDOWS_SCRIPT: &str = r#"
set out to ""
tell application "System Events"
    repeat with proc in (every process whose background only is false)
        try
            set procName to name of proc
            repeat with win in (every window of proc)
                try
                    set winName to name of win
                    set winPos to position of win
                    set winSize to size of win
                    set x to item 1 of winPos
                    set y to item 2 of winPos
                    set w to item 1 of winSize
                    set h to item 2 of winSize
                    if w > 10 and h > 10 then
                        if winName is "" then set winName to "<" & procName & ">"
                        set out to out & procName & "|" & winName & "|" & x & "|" & y & "|" & w & "|" & h & linefeed
                    end if
                end try
            end repeat
        end try
    end repeat
end tell
return out
"#;

/// Enumerate all visible windows.
pub fn list_windows() -> Result<Vec<WindowInfo>, WindowError> {
    let raw = run_osascript(LIST_WINDOWS_SCRIPT, LIST_TIMEOUT)?;
    let windows = parse_window_list(&raw);
    if windows.is_empty() {
        log::warn!("[CAPTURE] No windows reported by System Events");
    }
    Ok(windows)
}

/// Find a window by exact, case-insensitive app name or window title.
pub fn find_window(
    app: Option<&str>,
    title: Option<&str>,
) -> Result<WindowInfo, WindowError> {
    let windows = list_windows()?;
    for win in &windows {
        if let Some(app) = app {
            if win.app.eq_ignore_ascii_case(app) {
                return Ok(win.clone());
            }
        }
        if let Some(title) = title {
            if win.title.eq_ignore_ascii_case(title) {
                return Ok(win.clone());
            }
        }
    }
    Err(WindowError::NoMatch {
        app: app.map(str::to_string),
        title: title.map(str::to_string),
    })
}

/// Raise and focus a window by app name and/or title.
pub fn activate(app: Option<&str>, title: Option<&str>) -> Result<(), WindowError> {
    let script = match (app, title) {
        (Some(app), Some(title)) => format!(
            r#"
tell application "System Events"
    set appProc to first application process whose name is "{app}"
    set targetWindow to first window of appProc whose name is "{title}"
    set frontmost of appProc to true
    perform action "AXRaise" of targetWindow
end tell"#,
            app = escape(app),
            title = escape(title),
        ),
        (Some(app), None) => format!(r#"tell application "{}" to activate"#, escape(app)),
        (None, Some(title)) => format!(
            r#"
tell application "System Events"
    set appProc to first application process whose (exists window whose name is "{title}")
    set targetWindow to first window of appProc whose name is "{title}"
    set frontmost of appProc to true
    perform action "AXRaise" of targetWindow
end tell"#,
            title = escape(title),
        ),
        (None, None) => {
            return Err(WindowError::Script(
                "either an app name or a window title is required".to_string(),
            ))
        }
    };
    run_osascript(&script, KEY_TIMEOUT).map(|_| ())
}

/// Resize a window. Dimensions must be positive.
pub fn resize(app: &str, title: &str, width: u32, height: u32) -> Result<(), WindowError> {
    if width == 0 || height == 0 {
        return Err(WindowError::Script(format!(
            "invalid resize dimensions {}x{}",
            width, height
        )));
    }
    let script = format!(
        r#"
tell application "System Events"
    set proc to first process whose name is "{app}"
    set win to first window of proc whose name is "{title}"
    set size of win to {{{width}, {height}}}
end tell"#,
        app = escape(app),
        title = escape(title),
        width = width,
        height = height,
    );
    log::debug!("[CAPTURE] Resizing '{}' to {}x{}", title, width, height);
    run_osascript(&script, RESIZE_TIMEOUT).map(|_| ())
}

/// Send a named key (or a literal keystroke) to the frontmost window.
pub fn send_key(key: &str) -> Result<(), WindowError> {
    let command = match key_code(key) {
        Some(code) => format!("key code {}", code),
        None => format!(r#"keystroke "{}""#, escape(key)),
    };
    let script = format!(
        "tell application \"System Events\"\n    {}\nend tell",
        command
    );
    log::debug!("[CAPTURE] Sending key '{}'", key);
    run_osascript(&script, KEY_TIMEOUT).map(|_| ())
}

/// macOS virtual key codes for the page-turn keys a viewer understands.
pub fn key_code(key: &str) -> Option<u8> {
    match key.to_ascii_lowercase().as_str() {
        "right" => Some(124),
        "left" => Some(123),
        "up" => Some(126),
        "down" => Some(125),
        "space" => Some(49),
        "return" => Some(36),
        "escape" => Some(53),
        "tab" => Some(48),
        _ => None,
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn osascript_binary() -> Result<PathBuf, WindowError> {
    which::which("osascript").map_err(|_| WindowError::OsascriptMissing)
}

/// Run an AppleScript snippet with a hard timeout, returning stdout.
fn run_osascript(script: &str, timeout: Duration) -> Result<String, WindowError> {
    let binary = osascript_binary()?;
    let mut child = Command::new(binary)
        .arg("-e")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => {
                let mut stdout = String::new();
                if let Some(mut pipe) = child.stdout.take() {
                    use std::io::Read;
                    let _ = pipe.read_to_string(&mut stdout);
                }
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    use std::io::Read;
                    let _ = pipe.read_to_string(&mut stderr);
                }
                if !status.success() {
                    return Err(WindowError::Script(stderr.trim().to_string()));
                }
                return Ok(stdout);
            }
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WindowError::Timeout(timeout));
            }
            None => std::thread::sleep(Duration::from_millis(25)),
        }
    }
}

/// Parse `proc|title|x|y|w|h` lines. Titles may themselves contain pipes,
/// so the four geometry fields are taken from the end of the line.
fn parse_window_list(raw: &str) -> Vec<WindowInfo> {
    let mut windows = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 6 {
            continue;
        }
        let geometry: Option<Vec<i32>> = fields[fields.len() - 4..]
            .iter()
            .map(|f| f.trim().parse::<f64>().ok().map(|v| v.round() as i32))
            .collect();
        let Some(geometry) = geometry else {
            log::warn!("[CAPTURE] Skipping window line with bad geometry: {}", line);
            continue;
        };
        let app = fields[0].trim().to_string();
        let title = fields[1..fields.len() - 4].join("|").trim().to_string();
        windows.push(WindowInfo {
            app,
            title,
            x: geometry[0],
            y: geometry[1],
            width: geometry[2],
            height: geometry[3],
        });
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_window_lines() {
        let raw = "Preview|moby-dick.pdf|12|40|1280|960\nSafari|Start Page|0|0|1920|1080\n";
        let windows = parse_window_list(raw);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].app, "Preview");
        assert_eq!(windows[0].title, "moby-dick.pdf");
        assert_eq!(windows[0].width, 1280);
        assert_eq!(windows[1].app, "Safari");
        assert_eq!(windows[1].height, 1080);
    }

    #[test]
    fn title_may_contain_pipes() {
        let raw = "Books|Chapter 1 | The Whale|100|50|800|600\n";
        let windows = parse_window_list(raw);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].title, "Chapter 1 | The Whale");
        assert_eq!(windows[0].x, 100);
    }

    #[test]
    fn fractional_coordinates_round() {
        let raw = "App|Win|10.6|20.4|640.0|480.0\n";
        let windows = parse_window_list(raw);
        assert_eq!(windows[0].x, 11);
        assert_eq!(windows[0].y, 20);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let raw = "garbage\nApp|Win|1|2|not-a-number|4\nApp|Win|1|2|3|4\n";
        let windows = parse_window_list(raw);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].height, 4);
    }

    #[test]
    fn named_keys_map_to_key_codes() {
        assert_eq!(key_code("right"), Some(124));
        assert_eq!(key_code("Left"), Some(123));
        assert_eq!(key_code("space"), Some(49));
        assert_eq!(key_code("j"), None);
    }

    #[test]
    fn escape_quotes_for_applescript() {
        assert_eq!(escape(r#"My "Book""#), r#"My \"Book\""#);
    }
}
