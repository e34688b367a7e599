/// Incremental stop-sequence matcher over a growing output buffer.
///
/// Each `push` scans only the newly appended text plus the last
/// `longest - 1` bytes that were already there, so a marker split across two
/// increments is still found without rescanning the whole buffer.
#[derive(Debug)]
pub struct StopMatcher {
    stops: Vec<String>,
    longest: usize,
    buffer: String,
    matched: Option<String>,
}

impl StopMatcher {
    #[must_use]
    pub fn new(stops: &[String]) -> Self {
        let stops: Vec<String> = stops.iter().filter(|s| !s.is_empty()).cloned().collect();
        let longest = stops.iter().map(String::len).max().unwrap_or(0);
        Self {
            stops,
            longest,
            buffer: String::new(),
            matched: None,
        }
    }

    /// Append a piece of output. Returns `true` once a stop sequence has been
    /// seen; the buffer then ends right before the marker.
    pub fn push(&mut self, piece: &str) -> bool {
        if self.matched.is_some() {
            return true;
        }

        let previous_len = self.buffer.len();
        self.buffer.push_str(piece);

        if self.longest == 0 {
            return false;
        }

        let mut window_start = previous_len.saturating_sub(self.longest - 1);
        while !self.buffer.is_char_boundary(window_start) {
            window_start -= 1;
        }

        let window = &self.buffer[window_start..];
        let earliest = self
            .stops
            .iter()
            .filter_map(|stop| window.find(stop.as_str()).map(|at| (at, stop)))
            .min_by_key(|(at, _)| *at);

        if let Some((at, stop)) = earliest {
            let cut = window_start + at;
            self.matched = Some(stop.clone());
            self.buffer.truncate(cut);
            return true;
        }

        false
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub fn matched(&self) -> Option<&str> {
        self.matched.as_deref()
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(stops: &[&str]) -> StopMatcher {
        let stops: Vec<String> = stops.iter().map(|s| (*s).to_string()).collect();
        StopMatcher::new(&stops)
    }

    #[test]
    fn truncates_at_marker_in_single_piece() {
        let mut m = matcher(&["<|eot_id|>"]);
        assert!(!m.push("hello "));
        assert!(m.push("<|eot_id|>"));
        assert!(m.push("world"));
        assert_eq!(m.text(), "hello ");
        assert_eq!(m.matched(), Some("<|eot_id|>"));
    }

    #[test]
    fn finds_marker_split_across_pieces() {
        let mut m = matcher(&["<|im_end|>"]);
        assert!(!m.push("{\"a\":1}<|im"));
        assert!(!m.push("_e"));
        assert!(m.push("nd|>trailing"));
        assert_eq!(m.text(), "{\"a\":1}");
    }

    #[test]
    fn earliest_of_several_markers_wins() {
        let mut m = matcher(&["</s>", "<eos>"]);
        assert!(m.push("one<eos>two</s>"));
        assert_eq!(m.text(), "one");
        assert_eq!(m.matched(), Some("<eos>"));
    }

    #[test]
    fn window_respects_utf8_boundaries() {
        let mut m = matcher(&["<end_of_turn>"]);
        assert!(!m.push("caf\u{e9} \u{1f600}"));
        assert!(m.push("<end_of_turn>"));
        assert_eq!(m.text(), "caf\u{e9} \u{1f600}");
    }

    #[test]
    fn no_stops_never_matches() {
        let mut m = matcher(&[""]);
        assert!(!m.push("anything at all"));
        assert_eq!(m.into_text(), "anything at all");
    }
}
