/// Rejects oversized bodies, raw control characters in the path, and any
/// text matching an operator-defined blocklist entry. Patterns are literal
/// substrings, case-insensitive, applied to path, query, and body text alike.
#[derive(Debug, Clone)]
pub struct ContentScreen {
    max_body_bytes: usize,
    patterns: Vec<String>,
}

impl ContentScreen {
    pub fn new(max_body_bytes: usize, patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            max_body_bytes,
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn check_path(&self, path: &str) -> Result<(), String> {
        if path.chars().any(|c| c.is_control()) {
            return Err("path contains control characters".to_string());
        }
        self.check_text(path)
    }

    pub fn check_body_len(&self, len: usize) -> Result<(), String> {
        if len > self.max_body_bytes {
            return Err(format!("body exceeds {} bytes", self.max_body_bytes));
        }
        Ok(())
    }

    pub fn check_text(&self, text: &str) -> Result<(), String> {
        let lower = text.to_lowercase();
        if let Some(pattern) = self.patterns.iter().find(|p| lower.contains(p.as_str())) {
            return Err(format!("matched blocked pattern '{pattern}'"));
        }
        Ok(())
    }
}
