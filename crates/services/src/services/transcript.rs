use std::fmt;

use utils::command::CommandResult;
use utils::shell;

/// Plain-text log of a multi-step command flow, in the order the steps ran.
///
/// Each executed step is recorded as the command line, its combined output,
/// and its exit status, so a failure partway through a sequence shows exactly
/// which command broke and what it printed.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    buf: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a free-form note line.
    pub fn note(&mut self, line: impl AsRef<str>) {
        self.buf.push_str(line.as_ref());
        self.buf.push('\n');
    }

    /// Records one executed step.
    ///
    /// Format: `$ <command line>`, the trimmed combined output (omitted when
    /// empty), then `exit=<status>` and a blank separator line.
    pub fn step(&mut self, command_line: &str, result: &CommandResult) {
        self.buf.push_str("$ ");
        self.buf.push_str(command_line);
        self.buf.push('\n');
        let output = result.combined();
        let output = output.trim();
        if !output.is_empty() {
            self.buf.push_str(output);
            self.buf.push('\n');
        }
        self.buf.push_str("exit=");
        self.buf.push_str(&result.status.to_string());
        self.buf.push_str("\n\n");
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

/// Renders an argv for display in a transcript, quoting arguments that would
/// not survive a shell round trip. Display only; execution never goes through
/// a shell for these flows.
pub fn render_command<'a, I>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || "'\"\\$`".contains(c)) {
            line.push_str(&shell::quote(arg));
        } else {
            line.push_str(arg);
        }
    }
    line
}
