//! MegaHAL text tokenization: boundary detection, apostrophe rules,
//! and sentence-terminal normalization.
//!
//! Splits input text into an alternating sequence of word tokens and separator
//! tokens (whitespace, punctuation). Contractions like "DON'T" and "I'M" are
//! kept as single tokens via the apostrophe rule.
//!
//! No token is longer than [`MAX_TOKEN_LEN`] bytes: longer runs are cut at
//! character boundaries, so every token fits a brain file's length byte.
//!
//! This crate has no dependencies on other megahal crates. It is a pure text
//! processing utility that produces `Vec<String>`.

/// Longest token, in bytes.
pub const MAX_TOKEN_LEN: usize = 255;

/// Tokenize input text per MegaHAL rules.
///
/// 1. Converts to uppercase.
/// 2. Splits on word boundaries (alpha/digit transitions, with apostrophe
///    exception for contractions).
/// 3. Cuts tokens longer than [`MAX_TOKEN_LEN`] bytes into pieces.
/// 4. Ensures the token sequence ends with sentence-terminal punctuation
///    (`!`, `.`, or `?`).
///
/// # Examples
///
/// ```
/// use megahal_tokenizer::tokenize;
///
/// let tokens = tokenize("Don't you think so?");
/// assert_eq!(tokens, vec!["DON'T", " ", "YOU", " ", "THINK", " ", "SO", "?"]);
/// ```
pub fn tokenize(input: &str) -> Vec<String> {
    if input.is_empty() {
        return vec![".".to_string()];
    }

    let upper = input.to_uppercase();
    let bytes = upper.as_bytes();
    let mut tokens = Vec::new();
    let mut start = 0;

    for pos in 1..=bytes.len() {
        if is_boundary(bytes, pos) {
            if pos > start {
                push_chunked(&mut tokens, &upper[start..pos]);
            }
            start = pos;
        }
    }

    if tokens.is_empty() {
        return vec![".".to_string()];
    }

    // Sentence-terminal normalization.
    normalize_terminal(&mut tokens);

    tokens
}

/// Push `token`, cut into pieces of at most [`MAX_TOKEN_LEN`] bytes that never
/// split a character.
fn push_chunked(tokens: &mut Vec<String>, mut token: &str) {
    while token.len() > MAX_TOKEN_LEN {
        let mut cut = MAX_TOKEN_LEN;
        while !token.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = token.split_at(cut);
        tokens.push(head.to_string());
        token = tail;
    }
    tokens.push(token.to_string());
}

/// Determine if position `pos` in `input` is a word boundary.
///
/// Rules:
/// 1. pos == 0: never a boundary
/// 2. pos == len: always a boundary
/// 3. Apostrophe rule: if char at pos is `'` and both neighbors are alpha, no boundary.
///    If char at pos-1 is `'` and both pos-2 and pos are alpha, no boundary.
/// 4. Alpha transition: exactly one of pos and pos-1 is alphabetic → boundary
/// 5. Digit transition: digit status differs between pos and pos-1 → boundary
fn is_boundary(input: &[u8], pos: usize) -> bool {
    if pos == 0 {
        return false;
    }
    if pos == input.len() {
        return true;
    }

    let curr = input[pos];
    let prev = input[pos - 1];

    // Apostrophe rule: keep contractions together.
    if curr == b'\''
        && pos + 1 < input.len()
        && prev.is_ascii_alphabetic()
        && input[pos + 1].is_ascii_alphabetic()
    {
        return false;
    }
    if prev == b'\''
        && pos >= 2
        && input[pos - 2].is_ascii_alphabetic()
        && curr.is_ascii_alphabetic()
    {
        return false;
    }

    // Alpha transition: exactly one is alphabetic.
    if curr.is_ascii_alphabetic() != prev.is_ascii_alphabetic() {
        return true;
    }

    // Digit transition.
    if curr.is_ascii_digit() != prev.is_ascii_digit() {
        return true;
    }

    false
}

/// Ensure the token sequence ends with sentence-terminal punctuation.
///
/// - If the last token starts with an alphanumeric char, append "."
/// - Otherwise if the last token doesn't end with `!`, `.`, or `?`, replace it with "."
fn normalize_terminal(tokens: &mut Vec<String>) {
    let Some(last) = tokens.last_mut() else {
        tokens.push(".".to_string());
        return;
    };
    let first_byte = last.as_bytes().first().copied();
    let last_byte = last.as_bytes().last().copied();

    if first_byte.is_some_and(|b| b.is_ascii_alphanumeric()) {
        tokens.push(".".to_string());
    } else if last_byte.is_some_and(|b| !matches!(b, b'!' | b'.' | b'?')) {
        *last = ".".to_string();
    }
}
