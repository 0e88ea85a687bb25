//! Shell quoting and search-path utilities.

use std::{
    collections::HashSet,
    env::{join_paths, split_paths},
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

/// Directories prepended to the inherited `PATH` before spawning tools.
///
/// GUI-launched processes often inherit a minimal environment that excludes
/// Homebrew and other common install locations, so those are searched first.
pub const TOOL_SEARCH_DIRS: [&str; 6] = [
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
];

/// Returns the shell used for compound command lines.
pub fn get_shell_command() -> (&'static str, &'static str) {
    ("/bin/sh", "-c")
}

/// Quotes `value` as a single POSIX shell word.
///
/// The value is wrapped in single quotes; each embedded single quote closes
/// the quoting, emits an escaped quote, and reopens it (`'` becomes `'\''`).
/// The empty string quotes to `''`. Callers must quote exactly once, at the
/// point of interpolation.
pub fn quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Splits a user-entered command line into argv words using POSIX rules.
///
/// Returns `None` for empty input or input with unbalanced quoting.
pub fn split_command_line(line: &str) -> Option<Vec<String>> {
    shlex::split(line.trim()).filter(|words| !words.is_empty())
}

/// Merge two PATH strings into a single, de-duplicated PATH.
///
/// - Keeps the order of entries from `primary`.
/// - Appends only *unseen* entries from `secondary`.
/// - Ignores empty components.
pub fn merge_paths(primary: impl AsRef<OsStr>, secondary: impl AsRef<OsStr>) -> OsString {
    let mut seen = HashSet::<PathBuf>::new();
    let mut merged = Vec::<PathBuf>::new();

    for p in split_paths(primary.as_ref()).chain(split_paths(secondary.as_ref())) {
        if !p.as_os_str().is_empty() && seen.insert(p.clone()) {
            merged.push(p);
        }
    }

    join_paths(merged).unwrap_or_else(|_| primary.as_ref().to_os_string())
}

/// `PATH` value for spawned tools: `dirs` first, then whatever the current
/// process inherited.
pub fn search_path(dirs: &[PathBuf]) -> OsString {
    let prepend = join_paths(dirs.iter().cloned()).unwrap_or_default();
    let inherited = std::env::var_os("PATH").unwrap_or_default();
    merge_paths(prepend, inherited)
}

pub fn default_search_dirs() -> Vec<PathBuf> {
    TOOL_SEARCH_DIRS.iter().map(PathBuf::from).collect()
}

/// Resolves an executable name against `dirs` merged with the inherited
/// `PATH`. Absolute paths are only checked for existence.
pub fn resolve_executable(executable: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    which::which_in(executable, Some(search_path(dirs)), cwd).ok()
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_wraps_plain_strings() {
        assert_eq!(quote("hello"), "'hello'");
        assert_eq!(quote("two words"), "'two words'");
    }

    #[test]
    fn quote_escapes_embedded_single_quotes() {
        assert_eq!(quote("O'Brien's repo"), r"'O'\''Brien'\''s repo'");
    }

    #[test]
    fn quote_of_empty_string_is_two_quotes() {
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn quote_preserves_metacharacters() {
        assert_eq!(quote("a$(rm -rf)`b`\nc"), "'a$(rm -rf)`b`\nc'");
    }

    #[test]
    fn split_command_line_honours_quoting() {
        assert_eq!(
            split_command_line("issue create --title 'a b'"),
            Some(vec![
                "issue".to_string(),
                "create".to_string(),
                "--title".to_string(),
                "a b".to_string(),
            ])
        );
        assert_eq!(split_command_line("   "), None);
        assert_eq!(split_command_line("unbalanced '"), None);
    }

    #[test]
    fn merge_paths_deduplicates_keeping_first_seen() {
        let merged = merge_paths("/usr/bin:/bin", "/bin:/opt/x::/usr/bin");
        assert_eq!(merged, OsString::from("/usr/bin:/bin:/opt/x"));
    }

    #[test]
    fn search_path_prepends_tool_dirs() {
        let merged = search_path(&[PathBuf::from("/opt/homebrew/bin")]);
        let first = split_paths(&merged).next();
        assert_eq!(first, Some(PathBuf::from("/opt/homebrew/bin")));
    }

    #[test]
    fn resolve_executable_rejects_blank_names() {
        assert_eq!(resolve_executable("", &[]), None);
        assert_eq!(resolve_executable("   ", &[]), None);
    }

    #[test]
    fn resolve_executable_finds_sh() {
        let found = resolve_executable("sh", &default_search_dirs());
        assert!(found.is_some(), "sh should resolve on any unix host");
    }
}
