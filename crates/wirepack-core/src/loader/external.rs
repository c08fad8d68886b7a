//! External toolchain loaders.
//!
//! A command loader pipes the module source to a configured command on stdin
//! and takes its stdout as the transformed output. Rule options are passed as
//! JSON in `WIREPACK_LOADER_OPTIONS`, the module path in `WIREPACK_RESOURCE`.

use super::{Loader, LoaderContext, LoaderError, OutputKind};
use crate::config::ExternalLoaderConfig;
use crate::error::Error;
use std::io::Write;
use std::process::{Command, Stdio};

/// A loader backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandLoader {
    name: String,
    command: String,
    args: Vec<String>,
    produces: OutputKind,
}

impl CommandLoader {
    /// Build from a `loaders` table entry.
    pub fn from_config(name: &str, config: &ExternalLoaderConfig) -> Result<Self, Error> {
        if config.command.trim().is_empty() {
            return Err(Error::invalid(format!("loaders.{name}: empty command")));
        }
        let produces = match config.produces.as_deref() {
            None | Some("script") => OutputKind::Script,
            Some("stylesheet") => OutputKind::Stylesheet,
            Some(other) => {
                return Err(Error::invalid(format!(
                    "loaders.{name}: unknown output kind '{other}' (expected script or stylesheet)"
                )))
            }
        };
        Ok(Self {
            name: name.to_string(),
            command: config.command.clone(),
            args: config.args.clone(),
            produces,
        })
    }
}

impl Loader for CommandLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn produces(&self) -> Option<OutputKind> {
        Some(self.produces)
    }

    fn transform(&self, input: &str, ctx: &mut LoaderContext<'_>) -> Result<String, LoaderError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(ctx.root)
            .env("WIREPACK_RESOURCE", ctx.resource)
            .env("WIREPACK_LOADER_OPTIONS", ctx.options.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LoaderError::new(format!("failed to spawn '{}': {e}", self.command)))?;

        // Feed stdin from a separate thread so a chatty child can't deadlock us.
        let stdin = child.stdin.take();
        let bytes = input.as_bytes().to_vec();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&bytes)?;
            }
            Ok(())
        });

        let output = child
            .wait_with_output()
            .map_err(|e| LoaderError::new(format!("'{}' failed: {e}", self.command)))?;
        let write_result = writer
            .join()
            .map_err(|_| LoaderError::new("stdin writer panicked"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(LoaderError::new(if stderr.is_empty() {
                format!("'{}' exited with {code}", self.command)
            } else {
                stderr
            }));
        }
        // A child that exits successfully without reading stdin is fine.
        if let Err(e) = write_result {
            tracing::debug!(loader = %self.name, error = %e, "stdin not fully consumed");
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            ctx.warn(line.to_string());
        }
        String::from_utf8(output.stdout)
            .map_err(|_| LoaderError::new(format!("'{}' produced non-UTF-8 output", self.command)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    fn loader(command: &str, args: &[&str]) -> CommandLoader {
        CommandLoader::from_config(
            "ext",
            &ExternalLoaderConfig {
                command: command.to_string(),
                args: args.iter().map(ToString::to_string).collect(),
                produces: None,
            },
        )
        .unwrap()
    }

    fn run(loader: &CommandLoader, input: &str) -> (Result<String, LoaderError>, Vec<String>) {
        let options = serde_json::json!({ "x": 1 });
        let mut ctx = LoaderContext {
            resource: Path::new("/tmp/a.ts"),
            root: Path::new("/"),
            options: &options,
            warnings: Vec::new(),
        };
        let result = loader.transform(input, &mut ctx);
        (result, ctx.warnings)
    }

    #[test]
    fn test_stdin_to_stdout() {
        let (out, warnings) = run(&loader("sh", &["-c", "tr a-z A-Z"]), "let a = 1;");
        assert_eq!(out.unwrap(), "LET A = 1;");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_options_in_environment() {
        let (out, _) = run(&loader("sh", &["-c", "printf %s \"$WIREPACK_LOADER_OPTIONS\""]), "");
        assert_eq!(out.unwrap(), r#"{"x":1}"#);
    }

    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let (out, _) = run(&loader("sh", &["-c", "echo 'SyntaxError: nope' >&2; exit 2"]), "x");
        assert_eq!(out.unwrap_err().0, "SyntaxError: nope");
    }

    #[test]
    fn test_stderr_on_success_is_warning() {
        let (out, warnings) = run(&loader("sh", &["-c", "cat; echo deprecated >&2"]), "ok");
        assert_eq!(out.unwrap(), "ok");
        assert_eq!(warnings, vec!["deprecated".to_string()]);
    }

    #[test]
    fn test_missing_command() {
        let (out, _) = run(&loader("wirepack-no-such-command", &[]), "x");
        assert!(out.unwrap_err().0.contains("failed to spawn"));
    }

    #[test]
    fn test_unknown_output_kind() {
        let err = CommandLoader::from_config(
            "vue",
            &ExternalLoaderConfig {
                command: "vue-compile".to_string(),
                args: vec![],
                produces: Some("image".to_string()),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown output kind"));
    }
}
