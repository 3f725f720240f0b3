use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

/// Maximum length of a command preview in events and logs.
const COMMAND_PREVIEW_MAX_LEN: usize = 100;

/// Build the `sh -c <command>` invocation for a sandboxed run.
///
/// The child gets its own process group (PGID == PID) so the whole tree can
/// be signalled at once; stdin is closed and both output streams are piped.
pub(crate) fn shell_command(shell: &Path, command: &str) -> Command {
    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    cmd
}

/// Truncate a command string for display, preserving UTF-8 boundaries.
pub(crate) fn preview(command: &str) -> String {
    if command.len() <= COMMAND_PREVIEW_MAX_LEN {
        return command.to_string();
    }
    let end = command
        .char_indices()
        .take_while(|(i, _)| *i < COMMAND_PREVIEW_MAX_LEN)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(COMMAND_PREVIEW_MAX_LEN);
    match command.get(..end) {
        Some(head) => format!("{head}..."),
        None => command.to_string(),
    }
}
