//! Helper scripts rendered into the target root and executed under chroot.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use twinaos_core::Secret;

use crate::error::{ScriptError, WriteError};

use super::{ActionContext, CommandResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChrootScript {
    name: &'static str,
    lines: Vec<String>,
}

impl ChrootScript {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lines: Vec::new(),
        }
    }

    /// Append one command line. Callers quote every untrusted value.
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/sh\nset -e\n");
        for line in &self.lines {
            script.push_str(line);
            script.push('\n');
        }
        script
    }
}

/// Write `contents` to `path`, creating parent directories first.
pub fn write_file(path: &Path, contents: &str) -> Result<(), WriteError> {
    let result = match path.parent() {
        Some(parent) => fs::create_dir_all(parent).and_then(|_| fs::write(path, contents)),
        None => fs::write(path, contents),
    };
    result.map_err(|source| WriteError {
        path: path.to_path_buf(),
        source,
    })
}

fn make_executable(path: &Path) -> Result<(), WriteError> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| WriteError {
        path: path.to_path_buf(),
        source,
    })
}

/// Render, write, mark executable, run inside the target root, then remove the script.
///
/// `stdin` carries secrets so they never appear in the script body.
pub fn run_chroot_script(
    ctx: &ActionContext,
    script: &ChrootScript,
    stdin: Option<Secret>,
) -> Result<CommandResult, ScriptError> {
    let host_path: PathBuf = ctx.layout.root().join(script.name());
    write_file(&host_path, &script.render())?;
    make_executable(&host_path)?;

    let mut operation = ctx.chroot_operation(&format!("/{}", script.name()), Vec::<String>::new());
    if let Some(payload) = stdin {
        operation = operation.stdin(payload);
    }
    info!(script = script.name(), "running chroot script");
    let result = ctx.run(operation);

    if let Err(err) = fs::remove_file(&host_path) {
        warn!(path = %host_path.display(), ?err, "failed to remove helper script");
    }

    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRunner, Harness};

    #[test]
    fn render_starts_with_shebang_and_errexit() {
        let script = ChrootScript::new("demo.sh").line("true").line("echo done");
        assert_eq!(script.render(), "#!/bin/sh\nset -e\ntrue\necho done\n");
    }

    #[test]
    fn script_runs_under_chroot_and_is_removed() {
        let harness = Harness::new(FakeRunner::new());
        let script = ChrootScript::new("demo.sh").line("true");
        run_chroot_script(&harness.context(), &script, Some(Secret::new("payload")))
            .expect("script ran");

        let calls = harness.runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program(), "chroot");
        assert_eq!(
            calls[0].arguments(),
            [harness.root().display().to_string(), "/demo.sh".to_string()]
        );
        assert_eq!(
            calls[0].stdin_payload().map(Secret::expose),
            Some("payload")
        );
        assert!(!harness.root().join("demo.sh").exists());
    }

    #[test]
    fn script_is_removed_even_when_it_fails() {
        let harness = Harness::new(FakeRunner::new().fail_when(|op| op.program() == "chroot"));
        let script = ChrootScript::new("demo.sh").line("false");
        let err = run_chroot_script(&harness.context(), &script, None).unwrap_err();
        assert!(matches!(err, ScriptError::Command(_)));
        assert!(!harness.root().join("demo.sh").exists());
    }

    #[test]
    fn write_file_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("etc").join("fstab");
        write_file(&path, "contents\n").expect("written");
        assert_eq!(fs::read_to_string(path).expect("read"), "contents\n");
    }
}
