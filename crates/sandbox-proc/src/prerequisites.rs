use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sandbox::SandboxError;

/// Shell used when the caller does not configure one and `sh` is not on `PATH`.
const FALLBACK_SHELL: &str = "/bin/sh";

/// Resolve and verify the shell that will run sandboxed commands.
///
/// Collects all failures and returns them in a single `SpawnFailed` error, so
/// nothing is spawned when the interpreter is missing.
pub(crate) fn resolve_shell(configured: Option<&Path>) -> Result<PathBuf, SandboxError> {
    let shell = match configured {
        Some(path) => path.to_path_buf(),
        None => which::which("sh").unwrap_or_else(|_| PathBuf::from(FALLBACK_SHELL)),
    };

    let mut errors = Vec::new();
    check_file_exists(&shell, "shell", &mut errors);
    check_executable(&shell, "shell", &mut errors);

    if errors.is_empty() {
        Ok(shell)
    } else {
        Err(SandboxError::SpawnFailed(errors.join("; ")))
    }
}

fn check_file_exists(path: &Path, label: &str, errors: &mut Vec<String>) {
    if !path.exists() {
        errors.push(format!("{label} not found: {}", path.display()));
    }
}

fn check_executable(path: &Path, label: &str, errors: &mut Vec<String>) {
    if let Ok(meta) = path.metadata()
        && meta.permissions().mode() & 0o111 == 0
    {
        errors.push(format!("{label} is not executable: {}", path.display()));
    }
}
