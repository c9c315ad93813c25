//! Text tokenization for indexing and querying.
//!
//! Tokens are lowercased, split on non-alphanumeric boundaries, and
//! filtered: anything of length <= 2 or in the stop-word list is
//! dropped. The same function runs at index and query time so both
//! sides agree on token identity.

use std::collections::HashSet;

/// Common English words that carry no search signal.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was",
    "one", "our", "out", "day", "get", "has", "him", "his", "how", "its", "may", "new",
    "now", "old", "see", "two", "way", "who", "this", "that", "with", "from", "have",
    "will", "your", "they", "been", "were", "what", "when", "which", "their", "there",
];

/// One token plus its word position in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Word index in the text (counted before stop-word filtering).
    pub position: u32,
}

/// Split text into searchable tokens.
pub fn tokenize(text: &str) -> Vec<Token> {
    let lowered = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut position = 0u32;

    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let current = position;
        position += 1;

        if word.len() <= 2 || STOP_WORDS.contains(&word) {
            continue;
        }
        tokens.push(Token {
            text: word.to_string(),
            position: current,
        });
    }

    tokens
}

/// All overlapping 3-character windows of the lowercased text.
pub fn trigrams(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let mut grams = HashSet::new();
    for window in chars.windows(3) {
        grams.insert(window.iter().collect());
    }
    grams
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_splits() {
        let tokens = tokenize("Swift Optimization: faster BUILDS");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["swift", "optimization", "faster", "builds"]);
    }

    #[test]
    fn test_drops_short_tokens_and_stop_words() {
        let tokens = tokenize("a an the cat sat on it");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["cat", "sat"]);
    }

    #[test]
    fn test_positions_count_all_words() {
        let tokens = tokenize("the quick fox");
        // "the" occupies position 0 even though it is filtered out.
        assert_eq!(tokens[0].text, "quick");
        assert_eq!(tokens[0].position, 1);
        assert_eq!(tokens[1].position, 2);
    }

    #[test]
    fn test_trigrams_overlap() {
        let grams = trigrams("Swift");
        assert!(grams.contains("swi"));
        assert!(grams.contains("wif"));
        assert!(grams.contains("ift"));
        assert_eq!(grams.len(), 3);
    }

    #[test]
    fn test_trigrams_short_text() {
        assert!(trigrams("ab").is_empty());
    }
}
