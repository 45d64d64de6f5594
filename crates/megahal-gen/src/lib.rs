//! MegaHAL reply generation: babble, seeding, bidirectional generation,
//! and surprise evaluation.
//!
//! This crate implements the core MegaHAL reply generation algorithm:
//!
//! 1. **Seed** a starting symbol from the keywords, weighted toward the ones
//!    the crosstab considers most specific, or from the crosstab itself.
//! 2. **Forward phase**: babble from the seed to generate the rest of the sentence.
//! 3. **Backward phase**: babble backward from the seed to generate the beginning.
//! 4. **Evaluate** candidates by surprise scoring (Shannon entropy of keywords).
//! 5. **Select** the highest-scoring candidate before the generation limit.
//!
//! The babble function drives the [`ContextWindow`] directly. In the deepest
//! known context it greedily takes a keyword child not used yet, and otherwise
//! draws a child by frequency.

use std::time::{Duration, Instant};

use crosstab::Crosstab;
use markov_chain::{ContextWindow, Model};
use megahal_keywords::Keywords;
use ngram_trie::Tree;
use rand::Rng;
use symbol_core::{ERROR_ID, FIN_ID, SymbolId};
use tracing::debug;

/// Replies stop growing at this many symbols in either direction.
pub const MAX_REPLY_LEN: usize = 1024;

/// Controls how many candidate replies are generated before selecting the best.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationLimit {
    /// Stop after the given duration.
    Timeout(Duration),
    /// Stop after the given number of iterations.
    Iterations(usize),
    /// Stop when either limit is reached.
    Both {
        timeout: Duration,
        max_iterations: usize,
    },
}

impl Default for GenerationLimit {
    fn default() -> Self {
        GenerationLimit::Timeout(Duration::from_secs(1))
    }
}

impl GenerationLimit {
    /// Fix the limit to a wall-clock deadline starting at `start`.
    pub fn budget(&self, start: Instant) -> Budget {
        let (timeout, max_iterations) = match *self {
            GenerationLimit::Timeout(d) => (Some(d), None),
            GenerationLimit::Iterations(n) => (None, Some(n)),
            GenerationLimit::Both {
                timeout,
                max_iterations,
            } => (Some(timeout), Some(max_iterations)),
        };
        Budget {
            deadline: timeout.map(|d| start + d),
            max_iterations,
        }
    }
}

/// A generation limit anchored in time. Checked between candidates only.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Option<Instant>,
    max_iterations: Option<usize>,
}

impl Budget {
    pub fn exhausted(&self, iterations: usize) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.max_iterations.is_some_and(|n| iterations >= n)
    }
}

/// Generate the best reply for the given input and keywords.
///
/// 1. Generate a baseline reply with no keywords.
/// 2. Repeatedly generate candidates with keywords, scoring each by surprise.
/// 3. Return the highest-scoring non-empty candidate that differs from the input.
///
/// Returns an empty reply when the model knows nothing.
pub fn generate_reply<R: Rng + ?Sized>(
    model: &Model,
    crosstab: &Crosstab,
    input: &[SymbolId],
    keywords: &Keywords,
    limit: &GenerationLimit,
    rng: &mut R,
) -> Vec<SymbolId> {
    let budget = limit.budget(Instant::now());
    let none = Keywords::new();

    // Baseline reply (no keyword bias).
    let mut best = generate_one_reply(model, crosstab, &none, rng);
    let mut max_surprise: f64 = -1.0;
    let mut iterations = 0;

    while !budget.exhausted(iterations) {
        let candidate = generate_one_reply(model, crosstab, keywords, rng);
        let surprise = evaluate_reply(model, crosstab, &candidate, keywords);

        if !candidate.is_empty() && surprise > max_surprise && candidate != input {
            max_surprise = surprise;
            best = candidate;
        }
        iterations += 1;
    }

    debug!(iterations, surprise = max_surprise, len = best.len(), "generated reply");
    best
}

/// Generate a single candidate reply (forward + backward phases).
pub fn generate_one_reply<R: Rng + ?Sized>(
    model: &Model,
    crosstab: &Crosstab,
    keywords: &Keywords,
    rng: &mut R,
) -> Vec<SymbolId> {
    let mut reply: Vec<SymbolId> = Vec::new();
    let mut used_key = false;

    // Forward phase.
    let mut ctx = model.forward_context();

    let seed_id = seed(model, crosstab, keywords, rng);
    if seed_id == ERROR_ID || seed_id == FIN_ID {
        return reply;
    }

    reply.push(seed_id);
    ctx.advance(model.forward(), seed_id);

    while reply.len() < MAX_REPLY_LEN {
        let sym = babble(model.forward(), &ctx, keywords, &reply, &mut used_key, rng);
        if sym == ERROR_ID || sym == FIN_ID {
            break;
        }
        reply.push(sym);
        ctx.advance(model.forward(), sym);
    }

    // Backward phase: re-establish context from the beginning of the reply,
    // walking from index min(len - 1, order) down to 0.
    let mut ctx = model.backward_context();
    let start = (reply.len() - 1).min(model.order() as usize);
    for &sym in reply[..=start].iter().rev() {
        ctx.advance(model.backward(), sym);
    }

    let mut prefix = Vec::new();
    while prefix.len() < MAX_REPLY_LEN {
        let sym = babble(model.backward(), &ctx, keywords, &reply, &mut used_key, rng);
        if sym == ERROR_ID || sym == FIN_ID {
            break;
        }
        prefix.push(sym);
        ctx.advance(model.backward(), sym);
    }

    prefix.reverse();
    prefix.extend_from_slice(&reply);
    prefix
}

/// Select a seed symbol for forward generation.
///
/// Primary keywords are drawn with weight `1 - ask(keyword)`, so words the
/// crosstab sees everywhere lose out to specific ones. Without a usable
/// keyword the crosstab picks a correlated word, and failing that any child of
/// the forward root will do.
fn seed<R: Rng + ?Sized>(
    model: &Model,
    crosstab: &Crosstab,
    keywords: &Keywords,
    rng: &mut R,
) -> SymbolId {
    let forward = model.forward();
    let root = forward.root();
    let children = forward.children(root);
    if children.is_empty() {
        return ERROR_ID;
    }

    let weighted: Vec<(SymbolId, f64)> = keywords
        .primary()
        .map(|k| (k, (1.0 - crosstab.ask(k)).max(0.0)))
        .collect();
    if !weighted.is_empty() {
        let total: f64 = weighted.iter().map(|&(_, w)| w).sum();
        if total > 0.0 {
            let mut credit = rng.random_range(0.0..total);
            for &(k, w) in &weighted {
                if credit < w {
                    return k;
                }
                credit -= w;
            }
        }
        return weighted[rng.random_range(0..weighted.len())].0;
    }

    let known = |s: SymbolId| !s.is_sentinel() && forward.find_child(root, s).is_some();
    if let Some(k) = crosstab.seed(rng, known) {
        return k;
    }

    let idx = rng.random_range(0..children.len());
    forward.node(children[idx]).symbol
}

/// Keyword-biased random symbol selection (the "babble" function).
fn babble<R: Rng + ?Sized>(
    tree: &Tree,
    ctx: &ContextWindow,
    keywords: &Keywords,
    reply: &[SymbolId],
    used_key: &mut bool,
    rng: &mut R,
) -> SymbolId {
    let Some(node) = ctx.deepest() else {
        return ERROR_ID;
    };
    let children = tree.children(node);
    if children.is_empty() {
        return ERROR_ID;
    }

    if !keywords.is_empty() {
        let branch = children.len();
        let start = rng.random_range(0..branch);
        for offset in 0..branch {
            let sym = tree.node(children[(start + offset) % branch]).symbol;
            if keywords.contains(sym)
                && (*used_key || !keywords.is_auxiliary(sym))
                && !reply.contains(&sym)
            {
                *used_key = true;
                return sym;
            }
        }
    }

    tree.sample(node, rng)
}

/// Surprise of `symbol` in `ctx`: mean probability over the first `order`
/// context depths, or `None` if no depth has seen it.
fn mean_probability(
    tree: &Tree,
    ctx: &ContextWindow,
    symbol: SymbolId,
    order: usize,
) -> Option<f64> {
    let mut prob = 0.0;
    let mut seen = 0;
    for j in 0..order {
        if let Some(parent_ref) = ctx.at_depth(j)
            && let Some(child_ref) = tree.find_child(parent_ref, symbol)
        {
            let parent = tree.node(parent_ref);
            if parent.child_sum > 0 {
                prob += tree.node(child_ref).value as f64 / parent.child_sum as f64;
                seen += 1;
            }
        }
    }
    (seen > 0).then(|| prob / seen as f64)
}

/// Score a candidate reply by surprise (Shannon entropy of keywords in context).
///
/// Each keyword term is scaled by `1 + (1 - ask(keyword))`, favouring replies
/// that use specific keywords.
pub fn evaluate_reply(
    model: &Model,
    crosstab: &Crosstab,
    candidate: &[SymbolId],
    keywords: &Keywords,
) -> f64 {
    if candidate.is_empty() {
        return 0.0;
    }
    let order = model.order() as usize;
    let mut entropy: f64 = 0.0;
    let mut num: usize = 0;

    let mut score = |tree: &Tree,
                     mut ctx: ContextWindow,
                     symbols: &mut dyn Iterator<Item = SymbolId>| {
        for sym in symbols {
            if keywords.contains(sym) {
                if let Some(p) = mean_probability(tree, &ctx, sym, order) {
                    entropy -= p.ln() * (1.0 + (1.0 - crosstab.ask(sym)));
                }
                num += 1;
            }
            ctx.advance(tree, sym);
        }
    };
    score(model.forward(), model.forward_context(), &mut candidate.iter().copied());
    score(model.backward(), model.backward_context(), &mut candidate.iter().rev().copied());

    // Length penalty.
    if num >= 8 {
        entropy /= ((num - 1) as f64).sqrt();
    }
    if num >= 16 {
        entropy /= num as f64;
    }

    entropy
}

/// Capitalize a token sequence per MegaHAL sentence-case rules.
///
/// The first letter is uppercased, as is the first letter after `!`, `.` or
/// `?` past the third byte; every other letter is lowercased.
pub fn capitalize(tokens: &[String]) -> String {
    let raw: String = tokens.concat();
    let mut result = String::with_capacity(raw.len());
    let mut capitalize_next = true;

    for (i, c) in raw.char_indices() {
        if c.is_ascii_alphabetic() {
            if capitalize_next {
                result.push(c.to_ascii_uppercase());
                capitalize_next = false;
            } else {
                result.push(c.to_ascii_lowercase());
            }
        } else {
            result.push(c);
            if matches!(c, '!' | '.' | '?') && i > 2 {
                capitalize_next = true;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn trained_model(order: u8, sentences: &[&[&str]]) -> Model {
        let mut model = Model::new(order, 100_000);
        for &sentence in sentences {
            model.learn(sentence);
        }
        model
    }

    fn id(model: &Model, word: &str) -> SymbolId {
        model.dictionary().lookup(word.as_bytes()).unwrap()
    }

    fn keywords(model: &Model, primary: &[&str], aux: &[&str]) -> Keywords {
        let mut k = Keywords::new();
        for w in primary {
            k.insert(id(model, w), false);
        }
        for w in aux {
            k.insert(id(model, w), true);
        }
        k
    }

    fn make_rng(s: u64) -> SmallRng {
        SmallRng::seed_from_u64(s)
    }

    fn empty_crosstab() -> Crosstab {
        Crosstab::new(16)
    }

    // --- GenerationLimit tests ---

    #[test]
    fn generation_limit_default_is_timeout() {
        let limit = GenerationLimit::default();
        assert!(matches!(limit, GenerationLimit::Timeout(_)));
    }

    #[test]
    fn budget_counts_iterations() {
        let budget = GenerationLimit::Iterations(3).budget(Instant::now());
        assert!(!budget.exhausted(2));
        assert!(budget.exhausted(3));
    }

    #[test]
    fn budget_deadline_in_the_past_is_exhausted() {
        let start = Instant::now() - Duration::from_secs(5);
        let budget = GenerationLimit::Both {
            timeout: Duration::from_secs(1),
            max_iterations: 1_000,
        }
        .budget(start);
        assert!(budget.exhausted(0));
    }

    // --- capitalize tests ---

    #[test]
    fn capitalize_basic() {
        let tokens = vec![
            "hello".to_string(),
            " ".to_string(),
            "world".to_string(),
            ".".to_string(),
        ];
        assert_eq!(capitalize(&tokens), "Hello world.");
    }

    #[test]
    fn capitalize_after_period() {
        let tokens = vec![
            "HELLO".to_string(),
            ". ".to_string(),
            "WORLD".to_string(),
            ".".to_string(),
        ];
        assert_eq!(capitalize(&tokens), "Hello. World.");
    }

    #[test]
    fn capitalize_empty() {
        let tokens: Vec<String> = vec![];
        assert_eq!(capitalize(&tokens), "");
    }

    #[test]
    fn capitalize_after_exclamation_and_question() {
        let tokens = vec![
            "wow".to_string(),
            "! ".to_string(),
            "really".to_string(),
            "? ".to_string(),
            "yes".to_string(),
            ".".to_string(),
        ];
        assert_eq!(capitalize(&tokens), "Wow! Really? Yes.");
    }

    #[test]
    fn capitalize_keeps_non_ascii() {
        let tokens = vec!["CAFÉ".to_string(), ".".to_string()];
        assert_eq!(capitalize(&tokens), "CafÉ.");
    }

    // --- seed tests ---

    #[test]
    fn seed_selects_keyword() {
        let model = trained_model(2, &[
            &["THE", " ", "CAT", " ", "SAT"],
            &["THE", " ", "DOG", " ", "RAN"],
        ]);
        let kws = keywords(&model, &["CAT"], &[]);
        let id_cat = id(&model, "CAT");
        let mut rng = make_rng(42);
        assert_eq!(seed(&model, &empty_crosstab(), &kws, &mut rng), id_cat);
    }

    #[test]
    fn seed_prefers_specific_keywords() {
        let model = trained_model(2, &[&["THE", " ", "CAT", " ", "SAT"]]);
        let the = id(&model, "THE");
        let cat = id(&model, "CAT");
        let sat = id(&model, "SAT");
        let mut crosstab = empty_crosstab();
        // THE and SAT share all the weight; CAT has none.
        crosstab.add_pair(the, sat, 10);
        let kws = keywords(&model, &["THE", "CAT"], &[]);
        let mut rng = make_rng(7);
        for _ in 0..50 {
            assert_eq!(seed(&model, &crosstab, &kws, &mut rng), cat);
        }
    }

    #[test]
    fn aux_keyword_falls_back_to_crosstab() {
        let model = trained_model(2, &[&["THE", " ", "MY", " ", "CAT"]]);
        let kws = keywords(&model, &[], &["MY"]);
        let cat = id(&model, "CAT");
        let mut crosstab = empty_crosstab();
        crosstab.add_pair(cat, cat, 1);
        let mut rng = make_rng(42);
        assert_eq!(seed(&model, &crosstab, &kws, &mut rng), cat);
    }

    #[test]
    fn seed_with_empty_keywords_picks_random() {
        let model = trained_model(2, &[&["THE", " ", "CAT"]]);
        let mut rng = make_rng(42);
        let got = seed(&model, &empty_crosstab(), &Keywords::new(), &mut rng);
        assert_ne!(got, ERROR_ID);
    }

    #[test]
    fn seed_returns_error_on_empty_model() {
        let model = Model::new(2, 100);
        let mut rng = make_rng(42);
        let got = seed(&model, &empty_crosstab(), &Keywords::new(), &mut rng);
        assert_eq!(got, ERROR_ID);
    }

    // --- babble tests ---

    #[test]
    fn babble_takes_unused_keyword_children() {
        let model = trained_model(1, &[
            &["GO", "NORTH"],
            &["GO", "SOUTH"],
            &["GO", "EAST"],
        ]);
        let go = id(&model, "GO");
        let south = id(&model, "SOUTH");
        let kws = keywords(&model, &["SOUTH"], &[]);
        let mut ctx = model.forward_context();
        ctx.advance(model.forward(), go);
        let mut rng = make_rng(3);
        for _ in 0..20 {
            let mut used = false;
            let got = babble(model.forward(), &ctx, &kws, &[go], &mut used, &mut rng);
            assert_eq!(got, south);
            assert!(used);
        }
        // Already in the reply: no longer forced.
        let mut used = false;
        let mut seen_other = false;
        for _ in 0..50 {
            let got = babble(model.forward(), &ctx, &kws, &[go, south], &mut used, &mut rng);
            seen_other |= got != south;
        }
        assert!(seen_other);
    }

    #[test]
    fn babble_holds_back_auxiliary_until_primary_used() {
        let model = trained_model(1, &[&["I", "SEE"], &["I", "MY"]]);
        let i = id(&model, "I");
        let my = id(&model, "MY");
        let kws = keywords(&model, &["SEE"], &["MY"]);
        let mut ctx = model.forward_context();
        ctx.advance(model.forward(), i);
        let mut rng = make_rng(11);
        let mut used = true;
        // With a primary already used, MY is taken whenever SEE is in the reply.
        let got = babble(model.forward(), &ctx, &kws, &[i, id(&model, "SEE")], &mut used, &mut rng);
        assert_eq!(got, my);
    }

    // --- evaluate_reply tests ---

    #[test]
    fn evaluate_empty_candidate_returns_zero() {
        let model = trained_model(2, &[&["A", "B", "C"]]);
        let score = evaluate_reply(&model, &empty_crosstab(), &[], &Keywords::new());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn evaluate_no_keywords_returns_zero() {
        let model = trained_model(2, &[&["A", "B", "C"]]);
        let candidate = [id(&model, "A"), id(&model, "B"), id(&model, "C")];
        let score = evaluate_reply(&model, &empty_crosstab(), &candidate, &Keywords::new());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn evaluate_with_keywords_returns_positive() {
        let model = trained_model(2, &[&["A", "B", "C"], &["A", "B", "C"], &["A", "B", "C"]]);
        let kws = keywords(&model, &["B"], &[]);
        let candidate = [id(&model, "A"), id(&model, "B"), id(&model, "C")];
        let score = evaluate_reply(&model, &empty_crosstab(), &candidate, &kws);
        assert!(score > 0.0, "Expected positive surprise, got {score}");
    }

    #[test]
    fn common_keywords_weigh_less() {
        let model = trained_model(2, &[&["A", "B", "C"], &["A", "D", "C"]]);
        let kws = keywords(&model, &["B"], &[]);
        let candidate = [id(&model, "A"), id(&model, "B"), id(&model, "C")];
        let plain = evaluate_reply(&model, &empty_crosstab(), &candidate, &kws);
        let mut crosstab = empty_crosstab();
        crosstab.add_pair(id(&model, "B"), id(&model, "C"), 5);
        let damped = evaluate_reply(&model, &crosstab, &candidate, &kws);
        assert!(damped < plain);
        assert!(damped > 0.0);
    }

    #[test]
    fn evaluate_unknown_symbol_skipped() {
        let model = trained_model(2, &[&["A", "B", "C"]]);
        let mut kws = Keywords::new();
        kws.insert(SymbolId(99), false);
        let score = evaluate_reply(&model, &empty_crosstab(), &[SymbolId(99)], &kws);
        assert_eq!(score, 0.0);
    }

    // --- generate_reply tests ---

    fn animals() -> Model {
        trained_model(
            2,
            &[
                &["THE", " ", "CAT", " ", "SAT"],
                &["THE", " ", "DOG", " ", "RAN"],
                &["A", " ", "BIG", " ", "CAT"],
            ],
        )
    }

    #[test]
    fn generate_reply_empty_model() {
        let model = Model::new(2, 100);
        let limit = GenerationLimit::Iterations(10);
        let mut rng = make_rng(42);
        let reply =
            generate_reply(&model, &empty_crosstab(), &[], &Keywords::new(), &limit, &mut rng);
        assert!(reply.is_empty());
    }

    #[test]
    fn generate_reply_produces_known_symbols() {
        let model = animals();
        let kws = keywords(&model, &["CAT"], &[]);
        let limit = GenerationLimit::Iterations(10);
        let mut rng = make_rng(42);
        let reply = generate_reply(&model, &empty_crosstab(), &[], &kws, &limit, &mut rng);
        assert!(!reply.is_empty());
        assert!(reply.iter().all(|s| !s.is_sentinel()));
        assert!(reply.iter().all(|s| s.as_usize() < model.dictionary().len()));
    }

    #[test]
    fn generate_reply_deterministic() {
        let build = || {
            let model = animals();
            let kws = keywords(&model, &["CAT"], &[]);
            let limit = GenerationLimit::Iterations(50);
            let mut rng = make_rng(42);
            generate_reply(&model, &empty_crosstab(), &[], &kws, &limit, &mut rng)
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn generate_reply_zero_iterations_returns_baseline() {
        let model = animals();
        let kws = keywords(&model, &["CAT"], &[]);
        let limit = GenerationLimit::Iterations(0);
        let mut rng = make_rng(42);
        let reply = generate_reply(&model, &empty_crosstab(), &[], &kws, &limit, &mut rng);
        assert!(reply.iter().all(|s| !s.is_sentinel()));
    }

    #[test]
    fn generate_reply_with_timeout() {
        let model = animals();
        let kws = keywords(&model, &["CAT"], &[]);
        let limit = GenerationLimit::Timeout(Duration::from_millis(50));
        let mut rng = make_rng(42);
        let started = Instant::now();
        let reply = generate_reply(&model, &empty_crosstab(), &[], &kws, &limit, &mut rng);
        assert!(!reply.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn reply_runs_from_sentence_start_to_end() {
        let model = trained_model(2, &[&["ONLY", " ", "ONE", " ", "WAY"]]);
        let kws = keywords(&model, &["ONE"], &[]);
        let limit = GenerationLimit::Iterations(5);
        let mut rng = make_rng(1);
        let reply = generate_reply(&model, &empty_crosstab(), &[], &kws, &limit, &mut rng);
        let words: Vec<&[u8]> = reply.iter().map(|&s| model.dictionary().resolve(s)).collect();
        let expected: [&[u8]; 5] = [b"ONLY", b" ", b"ONE", b" ", b"WAY"];
        assert_eq!(words, expected);
    }

    #[test]
    fn generate_reply_avoids_echoing_input() {
        let model = trained_model(
            2,
            &[
                &["A", " ", "B", " ", "C"],
                &["D", " ", "E", " ", "F"],
                &["A", " ", "B", " ", "C"],
            ],
        );
        let input: Vec<SymbolId> =
            ["A", " ", "B", " ", "C"].iter().map(|w| id(&model, w)).collect();
        let limit = GenerationLimit::Iterations(50);
        let mut rng = make_rng(42);
        let reply =
            generate_reply(&model, &empty_crosstab(), &input, &Keywords::new(), &limit, &mut rng);
        assert!(!reply.is_empty());
    }
}
