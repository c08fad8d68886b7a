//! Desktop notification sink.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use wirepack_core::plugins::{LogNotifier, Notifier};
use wirepack_core::report::Notification;

/// Shows notifications through `notify-send` (Linux) or `osascript` (macOS).
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: PathBuf,
}

impl DesktopNotifier {
    /// The platform notifier, or a fallback when none is installed.
    ///
    /// With `quiet` the log is off, so the fallback writes to stderr.
    pub fn detect(quiet: bool) -> Arc<dyn Notifier> {
        let name = if cfg!(target_os = "macos") {
            "osascript"
        } else {
            "notify-send"
        };
        match pick(which::which(name).ok(), quiet) {
            Sink::Desktop(program) => Arc::new(Self { program }),
            Sink::Stderr => Arc::new(StderrNotifier),
            Sink::Log => {
                tracing::debug!(program = name, "no desktop notifier, logging instead");
                Arc::new(LogNotifier)
            }
        }
    }

    fn command(&self, n: &Notification) -> Command {
        let mut cmd = Command::new(&self.program);
        if cfg!(target_os = "macos") {
            let mut script = format!(
                "display notification {} with title {}",
                apple_string(&n.message),
                apple_string(&n.title)
            );
            if let Some(subtitle) = &n.subtitle {
                script.push_str(&format!(" subtitle {}", apple_string(subtitle)));
            }
            cmd.args(["-e", &script]);
        } else {
            let body = match &n.subtitle {
                Some(subtitle) => format!("{}\n{subtitle}", n.message),
                None => n.message.clone(),
            };
            cmd.args(["--app-name=wirepack", &n.title, &body]);
        }
        cmd
    }
}

impl Notifier for DesktopNotifier {
    fn send(&self, n: &Notification) -> Result<(), String> {
        let status = self
            .command(n)
            .status()
            .map_err(|e| format!("{}: {e}", self.program.display()))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{} exited with {status}", self.program.display()))
        }
    }
}

/// Writes notifications as one line on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrNotifier;

impl StderrNotifier {
    fn line(n: &Notification) -> String {
        match &n.subtitle {
            Some(subtitle) => format!("[{}] {} ({subtitle})", n.title, n.message),
            None => format!("[{}] {}", n.title, n.message),
        }
    }
}

impl Notifier for StderrNotifier {
    fn send(&self, n: &Notification) -> Result<(), String> {
        writeln!(std::io::stderr().lock(), "{}", Self::line(n)).map_err(|e| e.to_string())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Sink {
    Desktop(PathBuf),
    Stderr,
    Log,
}

fn pick(program: Option<PathBuf>, quiet: bool) -> Sink {
    match program {
        Some(program) => Sink::Desktop(program),
        None if quiet => Sink::Stderr,
        None => Sink::Log,
    }
}

fn apple_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
