//! Incremental detection and removal of the safety marker in streamed text

/// Strips the reserved marker from a chunked stream
///
/// The tail of the buffered text that could still grow into the marker is
/// held back until the next chunk decides it, so the marker never reaches the
/// caller regardless of where the stream is split.
#[derive(Debug, Clone)]
pub struct SafetyScanner {
    marker: String,
    pending: String,
    detected: bool,
}

impl SafetyScanner {
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            pending: String::new(),
            detected: false,
        }
    }

    /// Whether the marker has been seen so far
    #[must_use]
    pub const fn detected(&self) -> bool {
        self.detected
    }

    /// Feed one chunk; returns the text that is safe to show now
    pub fn push(&mut self, chunk: &str) -> String {
        if self.marker.is_empty() {
            return chunk.to_string();
        }

        self.pending.push_str(chunk);
        self.strip_markers();

        let hold = self.holdback_len();
        let emit_to = self.pending.len() - hold;
        let remainder = self.pending.split_off(emit_to);
        std::mem::replace(&mut self.pending, remainder)
    }

    /// End of stream: release whatever was held back
    ///
    /// A trailing partial marker is not the marker and is released unchanged.
    pub fn finish(&mut self) -> String {
        self.strip_markers();
        std::mem::take(&mut self.pending)
    }

    fn strip_markers(&mut self) {
        // Removing one occurrence can join two halves into a new one
        while let Some(pos) = self.pending.find(&self.marker) {
            self.pending.replace_range(pos..pos + self.marker.len(), "");
            self.detected = true;
        }
    }

    /// Length of the longest suffix of `pending` that is a proper prefix of the marker
    fn holdback_len(&self) -> usize {
        (1..self.marker.len())
            .rev()
            .filter(|&len| self.marker.is_char_boundary(len))
            .find(|&len| self.pending.ends_with(&self.marker[..len]))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "[EXPERT_REFERRAL_NEEDED]";

    fn run(chunks: &[&str]) -> (String, bool) {
        let mut scanner = SafetyScanner::new(MARKER);
        let mut out = String::new();
        for chunk in chunks {
            let emitted = scanner.push(chunk);
            assert!(!emitted.contains(MARKER));
            out.push_str(&emitted);
        }
        out.push_str(&scanner.finish());
        (out, scanner.detected())
    }

    #[test]
    fn test_plain_text_passes_through() {
        let (out, flagged) = run(&["많이 ", "힘드셨겠어요."]);
        assert_eq!(out, "많이 힘드셨겠어요.");
        assert!(!flagged);
    }

    #[test]
    fn test_marker_in_one_chunk() {
        let (out, flagged) = run(&["전문가와 상담해 보세요. [EXPERT_REFERRAL_NEEDED]"]);
        assert_eq!(out, "전문가와 상담해 보세요. ");
        assert!(flagged);
    }

    #[test]
    fn test_marker_under_every_split() {
        let text = format!("혼자 견디지 마세요.{MARKER} 곁에 있을게요.");
        let expected = "혼자 견디지 마세요. 곁에 있을게요.";
        let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).chain([text.len()]).collect();

        for &cut in &boundaries {
            let (out, flagged) = run(&[&text[..cut], &text[cut..]]);
            assert_eq!(out, expected, "split at {cut}");
            assert!(flagged);
        }

        let singles: Vec<String> = text.chars().map(String::from).collect();
        let singles: Vec<&str> = singles.iter().map(String::as_str).collect();
        let (out, flagged) = run(&singles);
        assert_eq!(out, expected);
        assert!(flagged);
    }

    #[test]
    fn test_holdback_released_when_not_marker() {
        let mut scanner = SafetyScanner::new(MARKER);
        assert_eq!(scanner.push("목록 [EXP"), "목록 ");
        assert_eq!(scanner.push("LAIN]"), "[EXPLAIN]");
        assert!(!scanner.detected());

        assert_eq!(scanner.push("끝 [EXPERT"), "끝 ");
        assert_eq!(scanner.finish(), "[EXPERT");
        assert!(!scanner.detected());
    }

    #[test]
    fn test_nested_marker_removed() {
        let (out, flagged) = run(&["a[EXPERT_REF", "[EXPERT_REFERRAL_NEEDED]", "ERRAL_NEEDED]b"]);
        assert_eq!(out, "ab");
        assert!(flagged);
    }

    #[test]
    fn test_marker_twice() {
        let (out, flagged) = run(&[MARKER, "안녕", MARKER]);
        assert_eq!(out, "안녕");
        assert!(flagged);
    }
}
