use regex::Regex;

/// Normalizes a user-entered project title into a repository-friendly name.
pub fn sanitize_project_name(input: &str) -> String {
    // 1. whitespace runs become single hyphens
    let joined = input.split_whitespace().collect::<Vec<_>>().join("-");

    // 2. collapse hyphen runs introduced by already-hyphenated words
    let re = Regex::new(r"-+").unwrap();
    let collapsed = re.replace_all(&joined, "-");

    // 3. trim leading/trailing hyphens
    collapsed.trim_matches('-').to_string()
}

/// Returns the first http(s) URL found in `text`, if any. Used to surface
/// repository/PR links from tools that print them amid plain prose.
pub fn first_url(text: &str) -> Option<String> {
    let re = Regex::new(r"https?://\S+").unwrap();
    re.find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string())
}

/// Truncates to at most `max_len` bytes without splitting a UTF-8 character.
pub fn truncate_to_char_boundary(content: &str, max_len: usize) -> &str {
    if content.len() <= max_len {
        return content;
    }

    let cutoff = content
        .char_indices()
        .map(|(idx, _)| idx)
        .take_while(|&idx| idx <= max_len)
        .last()
        .unwrap_or(0);

    &content[..cutoff]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_joins_words_with_hyphens() {
        assert_eq!(sanitize_project_name("My Cool Repo"), "My-Cool-Repo");
    }

    #[test]
    fn sanitize_collapses_runs_and_trims() {
        assert_eq!(sanitize_project_name("  a \t b\n\nc  "), "a-b-c");
        assert_eq!(sanitize_project_name("--already--hyphened--"), "already-hyphened");
        assert_eq!(sanitize_project_name("mix -- of  both"), "mix-of-both");
    }

    #[test]
    fn sanitize_of_blank_input_is_empty() {
        assert_eq!(sanitize_project_name("   \t  "), "");
    }

    #[test]
    fn first_url_finds_links_in_prose() {
        let out = "✓ Created repository\nhttps://github.com/someone/widget\n";
        assert_eq!(
            first_url(out),
            Some("https://github.com/someone/widget".to_string())
        );
        assert_eq!(first_url("no link here"), None);
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        assert_eq!(truncate_to_char_boundary("hello", 10), "hello");
        assert_eq!(truncate_to_char_boundary("hello", 3), "hel");
        // é is two bytes; a cut in the middle backs off to the boundary
        assert_eq!(truncate_to_char_boundary("aé", 2), "a");
    }
}
