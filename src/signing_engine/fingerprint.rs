//! Parsing of `ssh-keygen -l` output.

/// Rows of the randomart block inside `ssh-keygen -lv` output.
const VISUAL_FIRST_LINE: usize = 2;
const VISUAL_LINE_COUNT: usize = 9;

/// Extracts the fingerprint from a line like
/// `256 SHA256:abc... comment (ED25519-CERT)`.
///
/// Returns the token after the hash-algorithm prefix, or `None` if the output does not
/// look like a fingerprint line.
pub fn parse_fingerprint(output: &str) -> Option<String> {
    let line = output.lines().find(|line| !line.trim().is_empty())?;
    let mut tokens = line.split_whitespace();
    let _bits = tokens.next()?;
    let hashed = tokens.next()?;
    // the comment and key type must follow
    tokens.next()?;
    let (_algorithm, fingerprint) = hashed.split_once(':')?;
    if fingerprint.is_empty() {
        return None;
    }
    Some(fingerprint.to_string())
}

/// Cuts the randomart rows out of `ssh-keygen -lv` output and strips the `|` border.
pub fn parse_visual_fingerprint(output: &str) -> Option<String> {
    let lines: Vec<&str> = output
        .lines()
        .skip(VISUAL_FIRST_LINE)
        .take(VISUAL_LINE_COUNT)
        .collect();
    if lines.len() != VISUAL_LINE_COUNT {
        return None;
    }
    let rows: Vec<&str> = lines.iter().map(|line| line.trim_matches('|')).collect();
    Some(rows.join("\n"))
}
