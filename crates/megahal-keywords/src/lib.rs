//! MegaHAL keyword extraction: two-pass algorithm with swap table,
//! banned/auxiliary word lists, plus the co-occurrence feed for the crosstab.
//!
//! Keywords drive MegaHAL's reply generation by biasing the Markov walk toward
//! topically relevant symbols. Extraction works in two passes:
//!
//! 1. **Primary**: select words from input (after swap substitution) that are
//!    in the model dictionary, start with an alphanumeric character, and are
//!    neither banned nor auxiliary.
//! 2. **Auxiliary**: if at least one primary keyword was found, also add words
//!    from the auxiliary list (pronouns, possessives) that appear in input.
//!
//! Learning feeds a different view of the same rules: the primary-eligible
//! words of a sentence in order, paired up inside a small window
//! ([`correlation_pairs`]) to record which keywords keep company.

use std::collections::HashSet;

use symbol_core::{ERROR_ID, SymbolId};
use symbol_dict::Dictionary;

/// Pairs of keywords further apart than this are not correlated.
pub const CORRELATION_WINDOW: usize = 4;

/// Perspective-swapping substitution table.
///
/// When extracting keywords, input tokens are matched against `from` entries.
/// If a match is found, the corresponding `to` entry is used as the keyword
/// candidate instead. Multiple `from` entries can match the same token,
/// producing multiple keyword candidates (e.g., "YOU" → ["I", "ME"]).
#[derive(Debug, Clone, Default)]
pub struct SwapTable {
    /// (from, to) pairs. Scanned linearly for each input token.
    pub pairs: Vec<(String, String)>,
}

impl SwapTable {
    /// Apply swap substitutions to a token. Returns all matching `to` values.
    /// If no match, returns the original token.
    pub fn apply(&self, token: &str) -> Vec<String> {
        let mut results = Vec::new();
        for (from, to) in &self.pairs {
            if from.eq_ignore_ascii_case(token) {
                results.push(to.clone());
            }
        }
        if results.is_empty() {
            results.push(token.to_string());
        }
        results
    }
}

/// Configuration for keyword extraction. Word lists hold uppercase words.
#[derive(Debug, Clone, Default)]
pub struct KeywordConfig {
    /// Words that are never used as keywords (common function words).
    pub banned: HashSet<String>,
    /// Words used as keywords only to supplement existing primary keywords.
    pub auxiliary: HashSet<String>,
    /// Perspective-swapping substitutions.
    pub swap: SwapTable,
}

impl KeywordConfig {
    fn is_banned(&self, word: &str) -> bool {
        self.banned.contains(&word.to_uppercase())
    }

    fn is_auxiliary(&self, word: &str) -> bool {
        self.auxiliary.contains(&word.to_uppercase())
    }
}

/// The keywords of one input, as dictionary symbols in extraction order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords {
    words: Vec<SymbolId>,
    auxiliary: HashSet<SymbolId>,
}

impl Keywords {
    pub fn new() -> Self {
        Keywords::default()
    }

    /// Add a keyword. Returns false if it was already present.
    pub fn insert(&mut self, symbol: SymbolId, auxiliary: bool) -> bool {
        if self.words.contains(&symbol) {
            return false;
        }
        self.words.push(symbol);
        if auxiliary {
            self.auxiliary.insert(symbol);
        }
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, symbol: SymbolId) -> bool {
        self.words.contains(&symbol)
    }

    pub fn is_auxiliary(&self, symbol: SymbolId) -> bool {
        self.auxiliary.contains(&symbol)
    }

    /// All keywords, primary and auxiliary, in extraction order.
    pub fn as_slice(&self) -> &[SymbolId] {
        &self.words
    }

    /// Keywords that may seed a reply on their own.
    pub fn primary(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.words
            .iter()
            .copied()
            .filter(|s| !self.auxiliary.contains(s))
    }
}

fn known_symbol(word: &str, dict: &Dictionary) -> Option<SymbolId> {
    let first = word.as_bytes().first().copied();
    if !first.is_some_and(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    dict.lookup(word.as_bytes()).filter(|&id| id != ERROR_ID)
}

/// Extract keywords from tokenized input per the MegaHAL two-pass algorithm.
///
/// Tokens are matched against the dictionary byte for byte after swap
/// substitution, so they must already be in the model's case.
pub fn extract_keywords<T: AsRef<[u8]>>(
    tokens: &[T],
    dict: &Dictionary,
    config: &KeywordConfig,
) -> Keywords {
    let candidates: Vec<String> = tokens
        .iter()
        .flat_map(|tok| config.swap.apply(&String::from_utf8_lossy(tok.as_ref())))
        .collect();

    let mut keywords = Keywords::new();

    // Pass 1: primary keywords.
    for candidate in &candidates {
        if config.is_banned(candidate) || config.is_auxiliary(candidate) {
            continue;
        }
        if let Some(id) = known_symbol(candidate, dict) {
            keywords.insert(id, false);
        }
    }

    // Pass 2: auxiliary keywords, only alongside at least one primary.
    if !keywords.is_empty() {
        for candidate in &candidates {
            if !config.is_auxiliary(candidate) {
                continue;
            }
            if let Some(id) = known_symbol(candidate, dict) {
                keywords.insert(id, true);
            }
        }
    }

    keywords
}

/// Primary-eligible words of a learned sentence, in order, repeats kept.
///
/// No swap substitution: this describes what was said, not what to answer.
pub fn sentence_keywords<T: AsRef<[u8]>>(
    tokens: &[T],
    dict: &Dictionary,
    config: &KeywordConfig,
) -> Vec<SymbolId> {
    tokens
        .iter()
        .filter_map(|tok| {
            let word = String::from_utf8_lossy(tok.as_ref());
            if config.is_banned(&word) || config.is_auxiliary(&word) {
                return None;
            }
            known_symbol(&word, dict)
        })
        .collect()
}

/// Pair every keyword with the ones following it within `window` positions.
///
/// Weight is `window - distance + 1`, so neighbours count most. A keyword is
/// never paired with another occurrence of itself.
pub fn correlation_pairs(keywords: &[SymbolId], window: usize) -> Vec<(SymbolId, SymbolId, u32)> {
    let mut pairs = Vec::new();
    for (i, &a) in keywords.iter().enumerate() {
        for (distance, &b) in keywords[i + 1..].iter().enumerate().map(|(d, b)| (d + 1, b)) {
            if distance > window {
                break;
            }
            if a != b {
                pairs.push((a, b, (window - distance + 1) as u32));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict_of(words: &[&str]) -> Dictionary {
        let mut dict = Dictionary::new();
        for w in words {
            dict.intern(w.as_bytes());
        }
        dict
    }

    fn config(banned: &[&str], aux: &[&str], swap: &[(&str, &str)]) -> KeywordConfig {
        KeywordConfig {
            banned: banned.iter().map(|s| s.to_string()).collect(),
            auxiliary: aux.iter().map(|s| s.to_string()).collect(),
            swap: SwapTable {
                pairs: swap
                    .iter()
                    .map(|(a, b)| (a.to_string(), b.to_string()))
                    .collect(),
            },
        }
    }

    #[test]
    fn swap_table_basic() {
        let swap = SwapTable {
            pairs: vec![
                ("I".into(), "YOU".into()),
                ("YOU".into(), "I".into()),
                ("YOU".into(), "ME".into()),
            ],
        };

        assert_eq!(swap.apply("I"), vec!["YOU"]);

        let you_swaps = swap.apply("YOU");
        assert_eq!(you_swaps, vec!["I", "ME"]); // multiple matches

        assert_eq!(swap.apply("HELLO"), vec!["HELLO"]); // no match → original
    }

    #[test]
    fn swap_case_insensitive() {
        let swap = SwapTable {
            pairs: vec![("MY".into(), "YOUR".into())],
        };
        assert_eq!(swap.apply("my"), vec!["YOUR"]);
        assert_eq!(swap.apply("My"), vec!["YOUR"]);
    }

    #[test]
    fn primary_keywords_skip_banned_and_punctuation() {
        let dict = dict_of(&["THE", " ", "CAT", "."]);
        let cfg = config(&["THE"], &[], &[]);
        let kw = extract_keywords(&["THE", " ", "CAT", "."], &dict, &cfg);
        let cat = dict.lookup(b"CAT").unwrap();
        assert_eq!(kw.as_slice(), &[cat]);
        assert!(!kw.is_auxiliary(cat));
    }

    #[test]
    fn unknown_words_are_not_keywords() {
        let dict = dict_of(&["CAT"]);
        let kw = extract_keywords(&["DOG"], &dict, &KeywordConfig::default());
        assert!(kw.is_empty());
    }

    #[test]
    fn auxiliary_needs_a_primary() {
        let dict = dict_of(&["MY", "CAT"]);
        let cfg = config(&[], &["MY"], &[]);

        let alone = extract_keywords(&["MY"], &dict, &cfg);
        assert!(alone.is_empty());

        let kw = extract_keywords(&["MY", " ", "CAT"], &dict, &cfg);
        let my = dict.lookup(b"MY").unwrap();
        let cat = dict.lookup(b"CAT").unwrap();
        assert_eq!(kw.len(), 2);
        assert!(kw.is_auxiliary(my));
        assert_eq!(kw.primary().collect::<Vec<_>>(), vec![cat]);
    }

    #[test]
    fn swap_applies_before_lookup() {
        let dict = dict_of(&["YOUR", "CAT"]);
        let cfg = config(&[], &["YOUR"], &[("MY", "YOUR")]);
        let kw = extract_keywords(&["MY", " ", "CAT"], &dict, &cfg);
        let your = dict.lookup(b"YOUR").unwrap();
        assert!(kw.contains(your));
    }

    #[test]
    fn duplicates_are_collapsed() {
        let dict = dict_of(&["CAT"]);
        let kw = extract_keywords(&["CAT", "CAT"], &dict, &KeywordConfig::default());
        assert_eq!(kw.len(), 1);
    }

    #[test]
    fn sentence_keywords_keep_order_and_repeats() {
        let dict = dict_of(&["A", "B", " "]);
        let got = sentence_keywords(&["A", " ", "B", " ", "A"], &dict, &KeywordConfig::default());
        let a = dict.lookup(b"A").unwrap();
        let b = dict.lookup(b"B").unwrap();
        assert_eq!(got, vec![a, b, a]);
    }

    #[test]
    fn correlation_weights_fall_with_distance() {
        let k: Vec<SymbolId> = (2..8).map(SymbolId).collect();
        let pairs = correlation_pairs(&k, 4);
        assert!(pairs.contains(&(SymbolId(2), SymbolId(3), 4)));
        assert!(pairs.contains(&(SymbolId(2), SymbolId(6), 1)));
        assert!(!pairs.iter().any(|&(a, b, _)| a == SymbolId(2) && b == SymbolId(7)));
        // 6 keywords, window 4: 4 + 4 + 3 + 2 + 1 pairs
        assert_eq!(pairs.len(), 14);
    }

    #[test]
    fn correlation_skips_self_pairs() {
        let a = SymbolId(2);
        assert!(correlation_pairs(&[a, a], 4).is_empty());
        assert!(correlation_pairs(&[], 4).is_empty());
    }
}
