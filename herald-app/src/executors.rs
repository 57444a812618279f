//! Built-in action executors.
//!
//! | Action type | Args | Effect |
//! |-------------|------|--------|
//! | `open_url` | `url` | hands the URL to the platform opener |
//! | `launch` | `program`, optional `args` | spawns a detached process |
//! | `bring_to_front` | `process` | restores and focuses the process's main window (Windows) |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use herald_core::{ActionExecutor, ActionOutcome};
use tokio::process::Command;
use tracing::{error, info};

/// All executors the host registers with the engine.
pub fn builtin() -> Vec<Arc<dyn ActionExecutor>> {
    vec![
        Arc::new(OpenUrlExecutor::new()),
        Arc::new(LaunchExecutor),
        Arc::new(BringToFrontExecutor),
    ]
}

pub struct OpenUrlExecutor {
    /// Program plus leading arguments; the URL is appended.
    opener: Vec<String>,
}

impl OpenUrlExecutor {
    pub fn new() -> Self {
        Self::with_opener(platform_opener())
    }

    pub fn with_opener(opener: Vec<String>) -> Self {
        Self { opener }
    }
}

impl Default for OpenUrlExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// The URL is always passed as a single argv entry, never through a shell.
fn platform_opener() -> Vec<String> {
    #[cfg(target_os = "windows")]
    let opener = ["explorer"];
    #[cfg(target_os = "macos")]
    let opener = ["open"];
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let opener = ["xdg-open"];
    opener.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ActionExecutor for OpenUrlExecutor {
    fn action_type(&self) -> &str {
        "open_url"
    }

    async fn execute(&self, args: &HashMap<String, String>) -> ActionOutcome {
        let Some(url) = args.get("url").map(|u| u.trim()).filter(|u| !u.is_empty()) else {
            return ActionOutcome::failed("Missing 'url' argument");
        };
        let Some((program, leading)) = self.opener.split_first() else {
            return ActionOutcome::failed("no URL opener configured");
        };

        info!(url, "opening url");
        match Command::new(program).args(leading).arg(url).spawn() {
            Ok(_) => ActionOutcome::ok(format!("Opened {url}")),
            Err(e) => {
                error!(url, error = %e, "failed to open url");
                ActionOutcome::failed(e.to_string())
            }
        }
    }
}

pub struct LaunchExecutor;

#[async_trait]
impl ActionExecutor for LaunchExecutor {
    fn action_type(&self) -> &str {
        "launch"
    }

    async fn execute(&self, args: &HashMap<String, String>) -> ActionOutcome {
        let Some(program) = args
            .get("program")
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
        else {
            return ActionOutcome::failed("Missing 'program' argument");
        };
        let extra: Vec<&str> = args
            .get("args")
            .map(|a| a.split_whitespace().collect())
            .unwrap_or_default();

        info!(program, args = ?extra, "launching program");
        match Command::new(program).args(&extra).spawn() {
            Ok(child) => ActionOutcome::ok(format!(
                "Launched {program} (pid {})",
                child.id().unwrap_or_default()
            )),
            Err(e) => {
                error!(program, error = %e, "failed to launch program");
                ActionOutcome::failed(e.to_string())
            }
        }
    }
}

pub struct BringToFrontExecutor;

#[async_trait]
impl ActionExecutor for BringToFrontExecutor {
    fn action_type(&self) -> &str {
        "bring_to_front"
    }

    async fn execute(&self, args: &HashMap<String, String>) -> ActionOutcome {
        let Some(process) = args
            .get("process")
            .map(|p| process_stem(p))
            .filter(|p| !p.is_empty())
        else {
            return ActionOutcome::failed("Missing 'process' argument");
        };

        info!(process = %process, "bringing window to front");
        let target = process.clone();
        match tokio::task::spawn_blocking(move || window::activate_process(&target)).await {
            Ok(Ok(())) => ActionOutcome::ok(format!("Activated {process}")),
            Ok(Err(reason)) => {
                error!(process = %process, %reason, "failed to activate window");
                ActionOutcome::failed(reason)
            }
            Err(e) => ActionOutcome::failed(format!("window activation crashed: {e}")),
        }
    }
}

/// Lowercased executable name without directory or `.exe`.
fn process_stem(name: &str) -> String {
    let file = name
        .trim()
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match file.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => file,
    }
}

#[cfg(target_os = "windows")]
mod window {
    use super::process_stem;
    use windows_sys::Win32::Foundation::{CloseHandle, BOOL, HANDLE, HWND, LPARAM};
    use windows_sys::Win32::System::Threading::{
        AttachThreadInput, GetCurrentThreadId, OpenProcess, QueryFullProcessImageNameW,
        PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
    };
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetForegroundWindow, GetWindow, GetWindowThreadProcessId, IsIconic,
        IsWindowVisible, SetForegroundWindow, SetWindowPos, ShowWindow, GW_OWNER,
        HWND_NOTOPMOST, HWND_TOPMOST, SWP_NOMOVE, SWP_NOSIZE, SW_RESTORE, SW_SHOW,
    };

    struct Search {
        stem: String,
        found: Option<HWND>,
    }

    pub(super) fn activate_process(stem: &str) -> Result<(), String> {
        let mut search = Search {
            stem: stem.to_string(),
            found: None,
        };
        unsafe {
            EnumWindows(Some(visit), &mut search as *mut Search as LPARAM);
        }
        let hwnd = search
            .found
            .ok_or_else(|| format!("No window found for process {stem}"))?;
        if activate(hwnd) {
            Ok(())
        } else {
            Err(format!("Window of {stem} refused focus"))
        }
    }

    unsafe extern "system" fn visit(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = &mut *(lparam as *mut Search);
        if IsWindowVisible(hwnd) == 0 || !GetWindow(hwnd, GW_OWNER).is_null() {
            return 1;
        }
        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, &mut pid);
        if pid != 0 && image_stem(pid).as_deref() == Some(search.stem.as_str()) {
            search.found = Some(hwnd);
            return 0;
        }
        1
    }

    fn image_stem(pid: u32) -> Option<String> {
        unsafe {
            let hproc: HANDLE = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if hproc.is_null() {
                return None;
            }
            let mut buf = vec![0u16; 1024];
            let mut len = buf.len() as u32;
            let ok =
                QueryFullProcessImageNameW(hproc, PROCESS_NAME_WIN32, buf.as_mut_ptr(), &mut len);
            let _ = CloseHandle(hproc);
            if ok == 0 || len == 0 {
                return None;
            }
            Some(process_stem(&String::from_utf16_lossy(&buf[..len as usize])))
        }
    }

    fn activate(hwnd: HWND) -> bool {
        unsafe {
            if IsIconic(hwnd) != 0 {
                ShowWindow(hwnd, SW_RESTORE);
            } else {
                ShowWindow(hwnd, SW_SHOW);
            }
            SetForegroundWindow(hwnd);
            if GetForegroundWindow() == hwnd {
                return true;
            }

            // Foreground lock: borrow the foreground thread's input queue.
            let fore_thread = GetWindowThreadProcessId(GetForegroundWindow(), std::ptr::null_mut());
            let target_thread = GetWindowThreadProcessId(hwnd, std::ptr::null_mut());
            let own_thread = GetCurrentThreadId();
            let attach = fore_thread != own_thread;
            if attach {
                AttachThreadInput(fore_thread, own_thread, 1);
                AttachThreadInput(target_thread, own_thread, 1);
            }
            SetWindowPos(hwnd, HWND_TOPMOST, 0, 0, 0, 0, SWP_NOMOVE | SWP_NOSIZE);
            SetWindowPos(hwnd, HWND_NOTOPMOST, 0, 0, 0, 0, SWP_NOMOVE | SWP_NOSIZE);
            SetForegroundWindow(hwnd);
            let focused = GetForegroundWindow() == hwnd;
            if attach {
                AttachThreadInput(fore_thread, own_thread, 0);
                AttachThreadInput(target_thread, own_thread, 0);
            }
            focused
        }
    }
}

#[cfg(not(target_os = "windows"))]
mod window {
    pub(super) fn activate_process(_stem: &str) -> Result<(), String> {
        Err("bring_to_front is only supported on Windows".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn open_url_requires_url() {
        let outcome = OpenUrlExecutor::new().execute(&args(&[])).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Missing 'url' argument");

        let outcome = OpenUrlExecutor::new().execute(&args(&[("url", "  ")])).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn launch_requires_program() {
        let outcome = LaunchExecutor.execute(&args(&[("args", "-v")])).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Missing 'program' argument");
    }

    #[tokio::test]
    async fn launch_reports_spawn_failure() {
        let outcome = LaunchExecutor
            .execute(&args(&[("program", "herald-test-no-such-program")]))
            .await;
        assert!(!outcome.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn open_url_uses_configured_opener() {
        let exec = OpenUrlExecutor::with_opener(vec!["true".into()]);
        let outcome = exec.execute(&args(&[("url", "https://ya.ru")])).await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.message, "Opened https://ya.ru");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_spawns_program() {
        let outcome = LaunchExecutor
            .execute(&args(&[("program", "true"), ("args", "--ignored flag")]))
            .await;
        assert!(outcome.success, "{}", outcome.message);
    }

    #[test]
    fn builtin_covers_every_action_type() {
        let kinds: Vec<String> = builtin()
            .iter()
            .map(|e| e.action_type().to_string())
            .collect();
        assert_eq!(kinds, ["open_url", "launch", "bring_to_front"]);
    }

    #[test]
    fn opener_never_goes_through_a_shell() {
        let opener = platform_opener();
        assert_eq!(opener.len(), 1);
        assert!(!opener[0].eq_ignore_ascii_case("cmd"));
    }

    #[test]
    fn process_names_compare_by_stem() {
        assert_eq!(process_stem("Telegram.exe"), "telegram");
        assert_eq!(process_stem(r"C:\Program Files\Mozilla\FIREFOX.EXE"), "firefox");
        assert_eq!(process_stem("/usr/bin/code"), "code");
        assert_eq!(process_stem("  notepad "), "notepad");
    }

    #[tokio::test]
    async fn bring_to_front_requires_process() {
        let outcome = BringToFrontExecutor.execute(&args(&[("process", " ")])).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Missing 'process' argument");
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn bring_to_front_reports_unsupported_platform() {
        let outcome = BringToFrontExecutor
            .execute(&args(&[("process", "firefox")]))
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("only supported on Windows"));
    }
}
