use std::sync::Arc;

/// Receives engine progress as a fraction in `[0, 1]`.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Extract the first `current/total` pair of a progress line as a fraction.
///
/// Tokens are split on whitespace, then on `/`; each side keeps only digits
/// and `.` before parsing. Lines without a usable pair, or with
/// `total <= 0`, give `None`.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    line.split_whitespace().find_map(|token| {
        let (cur, total) = token.split_once('/')?;
        let cur = numeric(cur)?;
        let total = numeric(total)?;
        (total > 0.0).then(|| (cur / total).clamp(0.0, 1.0))
    })
}

fn numeric(s: &str) -> Option<f64> {
    let digits: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                if !self.carry.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.carry).into_owned());
                    self.carry.clear();
                }
            } else {
                self.carry.push(b);
            }
        }
        lines
    }

    /// Whatever is left once the stream closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        Some(line)
    }
}
