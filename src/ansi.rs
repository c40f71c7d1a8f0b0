use once_cell::sync::Lazy;
use regex::Regex;

/// CSI sequences (`ESC [ params intermediates final`) and two-byte escapes
/// (`ESC` followed by one of `@`..`Z`, `\`..`_`).
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ANSI escape pattern")
});

/// Removes ANSI escape sequences from CLI output.
///
/// Stripping repeats until nothing matches: removing one sequence can glue a
/// stray `ESC` to the bytes that followed the removed sequence.
pub fn strip_ansi(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let stripped = ANSI_ESCAPE.replace_all(&current, "");
        if stripped.len() == current.len() {
            return current;
        }
        current = stripped.into_owned();
    }
}
