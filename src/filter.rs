//! Stream filter construction: patterns compiled into the anchored
//! alternation the server expects.
//!
//! Grounded on `esdbclient/common.py`'s filter-regex helpers: include
//! compiles to `^pattern1|pattern2$`, exclude to a negative lookahead
//! `^(?!(pattern1$|pattern2$))`.

/// A filter applied to `readAll`/catch-up subscriptions on `$all`. Only one
/// of include/exclude is active on the wire; if include is non-empty,
/// exclude is ignored (per SPEC_FULL.md §4.5).
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    on_stream_id: bool,
}

impl StreamFilter {
    pub fn include(patterns: impl IntoIterator<Item = String>) -> Self {
        StreamFilter {
            include: patterns.into_iter().collect(),
            exclude: Vec::new(),
            on_stream_id: false,
        }
    }

    pub fn exclude(patterns: impl IntoIterator<Item = String>) -> Self {
        StreamFilter {
            include: Vec::new(),
            exclude: patterns.into_iter().collect(),
            on_stream_id: false,
        }
    }

    pub fn on_stream_id(mut self, on: bool) -> Self {
        self.on_stream_id = on;
        self
    }

    pub fn on_stream_id_enabled(&self) -> bool {
        self.on_stream_id
    }

    /// Render the `(include_regex, exclude_regex)` pair that goes on the
    /// wire. Include wins when both are populated.
    pub fn to_wire(&self) -> (String, String) {
        if !self.include.is_empty() {
            (anchored_alternation(&self.include), String::new())
        } else if !self.exclude.is_empty() {
            (String::new(), negative_lookahead(&self.exclude))
        } else {
            (String::new(), String::new())
        }
    }
}

fn anchored_alternation(patterns: &[String]) -> String {
    format!("^{}$", patterns.join("|"))
}

fn negative_lookahead(patterns: &[String]) -> String {
    let alternatives: Vec<String> = patterns.iter().map(|p| format!("{}$", p)).collect();
    format!("^(?!({}))", alternatives.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_compiles_to_anchored_alternation() {
        let f = StreamFilter::include(vec!["account-.*".to_string(), "order-.*".to_string()]);
        let (inc, exc) = f.to_wire();
        assert_eq!(inc, "^account-.*|order-.*$");
        assert_eq!(exc, "");
    }

    #[test]
    fn exclude_compiles_to_negative_lookahead() {
        let f = StreamFilter::exclude(vec!["heartbeat-.*".to_string()]);
        let (inc, exc) = f.to_wire();
        assert_eq!(inc, "");
        assert_eq!(exc, "^(?!(heartbeat-.*$))");
    }

    #[test]
    fn include_wins_when_both_present() {
        let mut f = StreamFilter::include(vec!["a.*".to_string()]);
        f.exclude = vec!["b.*".to_string()];
        let (inc, _) = f.to_wire();
        assert_eq!(inc, "^a.*$");
    }
}
