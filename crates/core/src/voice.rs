use serde::Serialize;

/// Speech synthesis voices used by the tutor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    /// Neutral voice. Problems are always read with it.
    Alloy,
    Nova,
    Shimmer,
    Echo,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Nova => "nova",
            Voice::Shimmer => "shimmer",
            Voice::Echo => "echo",
        }
    }
}

const FORMAL_MARKERS: [&str; 5] = ["please", "thank you", "excuse me", "sir", "madam"];

/// Picks a voice from the tone of a reply. The first matching rule wins:
/// questions, then exclamations, then formal phrasing.
pub fn select_voice(text: &str) -> Voice {
    if text.contains('?') {
        return Voice::Nova;
    }
    if text.contains('!') {
        return Voice::Shimmer;
    }
    let lower = text.to_lowercase();
    if FORMAL_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return Voice::Echo;
    }
    Voice::Alloy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_mark_takes_precedence() {
        assert_eq!(select_voice("Really? That's great!"), Voice::Nova);
        assert_eq!(select_voice("Thank you, sir?"), Voice::Nova);
    }

    #[test]
    fn test_exclamation_beats_formal_words() {
        assert_eq!(select_voice("Please, come in!"), Voice::Shimmer);
    }

    #[test]
    fn test_formal_markers_are_case_insensitive() {
        assert_eq!(select_voice("Excuse me, where is the station."), Voice::Echo);
        assert_eq!(select_voice("THANK YOU for waiting."), Voice::Echo);
    }

    #[test]
    fn test_plain_statement_is_neutral() {
        assert_eq!(select_voice("The weather is nice today."), Voice::Alloy);
        assert_eq!(Voice::Alloy.as_str(), "alloy");
    }
}
