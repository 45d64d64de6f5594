//! MegaHAL conversational engine: a bidirectional Markov chain chatbot with a
//! bounded, prunable memory.
//!
//! This is the facade crate that wires together all the lower-level components:
//! - [`symbol_core`]: `SymbolId` and the sentinels
//! - `symbol_dict`: Interning dictionary with reference counts
//! - `ngram_trie`: Arena-based context tree
//! - [`crosstab`]: Bounded keyword co-occurrence matrix
//! - [`markov_chain`]: Model, pruning and the brain file
//! - [`megahal_tokenizer`]: Text tokenization
//! - [`megahal_keywords`]: Keyword extraction and the correlation feed
//! - [`megahal_gen`]: Reply generation and evaluation
//!
//! # Quick Start
//!
//! ```
//! use megahal::{BrainConfig, MegaHal};
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let mut hal = MegaHal::with_config(BrainConfig::default(), SmallRng::seed_from_u64(42));
//! hal.learn("The cat sat on the mat.");
//! let reply = hal.respond("Tell me about the cat.");
//! println!("{reply}");
//! ```

use std::fs;
use std::io;
use std::path::Path;

use crosstab::Crosstab;
use markov_chain::Model;
use megahal_gen::{capitalize, generate_reply};
use megahal_keywords::{
    CORRELATION_WINDOW, Keywords, correlation_pairs, extract_keywords, sentence_keywords,
};
use megahal_tokenizer::tokenize;
use rand::Rng;
use symbol_core::{ERROR_ID, SymbolId};
use tracing::{debug, info};

// Re-export types that consumers (like the CLI) need.
pub use markov_chain::{BrainError, DumpFlags, LockPolicy};
pub use megahal_gen::GenerationLimit;
pub use megahal_keywords::{KeywordConfig, SwapTable};

/// Reply used when the model cannot produce anything yet.
pub const CANNED_REPLY: &str = "I don't know enough to answer you yet!";

/// Greeting used when no greeting keywords are configured or none produce a reply.
pub const DEFAULT_GREETING: &str = "Hello!";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Model order (context tree depth).
    pub order: u8,
    /// Total node allowance across both trees.
    pub node_budget: usize,
    /// Number of rows in the keyword correlation matrix.
    pub crosstab_capacity: usize,
    pub limit: GenerationLimit,
    pub lock: LockPolicy,
}

impl Default for BrainConfig {
    fn default() -> Self {
        BrainConfig {
            order: 5,
            node_budget: 100_000,
            crosstab_capacity: 512,
            limit: GenerationLimit::default(),
            lock: LockPolicy::default(),
        }
    }
}

/// The MegaHAL conversational engine.
///
/// Generic over the PRNG type `R` for testability. Defaults to `SmallRng`
/// for efficient, seedable random generation.
pub struct MegaHal<R: Rng> {
    /// The bidirectional Markov model.
    model: Model,
    /// Which keywords keep company, fed from every learned sentence.
    crosstab: Crosstab,
    /// Keyword extraction configuration (banned, auxiliary, swap).
    keyword_config: KeywordConfig,
    /// Greeting keywords.
    greetings: Vec<String>,
    config: BrainConfig,
    /// Random number generator.
    rng: R,
}

impl<R: Rng> MegaHal<R> {
    /// Create a new MegaHAL engine with the given model order and PRNG,
    /// everything else at its default.
    pub fn new(order: u8, rng: R) -> Self {
        MegaHal::with_config(BrainConfig { order, ..BrainConfig::default() }, rng)
    }

    pub fn with_config(config: BrainConfig, rng: R) -> Self {
        MegaHal {
            model: Model::new(config.order, config.node_budget).with_lock_policy(config.lock),
            crosstab: Crosstab::new(config.crosstab_capacity.max(1)),
            keyword_config: KeywordConfig::default(),
            greetings: Vec::new(),
            config,
            rng,
        }
    }

    /// Set the generation limit.
    pub fn set_limit(&mut self, limit: GenerationLimit) {
        self.config.limit = limit;
    }

    /// Set keyword configuration (banned words, auxiliary words, swap table).
    pub fn set_keyword_config(&mut self, config: KeywordConfig) {
        self.keyword_config = config;
    }

    /// Set greeting keywords.
    pub fn set_greetings(&mut self, greetings: Vec<String>) {
        self.greetings = greetings;
    }

    /// Change the node budget, pruning right away if the model no longer fits.
    pub fn set_node_budget(&mut self, node_budget: usize) {
        self.config.node_budget = node_budget;
        self.model.set_node_budget(node_budget);
        self.prune();
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    /// Learn from an input string without generating a reply.
    ///
    /// Returns false when the input was too short to learn from.
    pub fn learn(&mut self, input: &str) -> bool {
        let tokens = tokenize(input);
        self.learn_tokens(&tokens)
    }

    fn learn_tokens(&mut self, tokens: &[String]) -> bool {
        if !self.model.learn(tokens) {
            return false;
        }

        let keywords = sentence_keywords(tokens, self.model.dictionary(), &self.keyword_config);
        for (a, b, weight) in correlation_pairs(&keywords, CORRELATION_WINDOW) {
            self.crosstab.add_pair(a, b, weight);
        }

        self.prune();
        true
    }

    /// Prune the model and bring the crosstab in line with its dictionary.
    fn prune(&mut self) {
        let report = self.model.prune();
        if report.is_empty() {
            return;
        }
        for &symbol in &report.forgotten {
            self.crosstab.remove(symbol);
        }
        self.crosstab.relabel(&report.renumbered);
        debug!(
            reclaimed = report.reclaimed,
            forgotten = report.forgotten.len(),
            renumbered = report.renumbered.len(),
            "crosstab follows pruned dictionary"
        );
    }

    /// Learn from input and generate a reply.
    ///
    /// This follows the MegaHAL conversation flow: learn first, then generate.
    pub fn respond(&mut self, input: &str) -> String {
        let tokens = tokenize(input);
        self.learn_tokens(&tokens);
        self.reply_to(&tokens)
    }

    /// Generate a reply without learning from the input.
    pub fn generate(&mut self, input: &str) -> String {
        let tokens = tokenize(input);
        self.reply_to(&tokens)
    }

    fn reply_to(&mut self, tokens: &[String]) -> String {
        let keywords = extract_keywords(tokens, self.model.dictionary(), &self.keyword_config);
        let input: Vec<SymbolId> = tokens
            .iter()
            .map(|tok| self.model.dictionary().lookup(tok.as_bytes()).unwrap_or(ERROR_ID))
            .collect();

        let reply = generate_reply(
            &self.model,
            &self.crosstab,
            &input,
            &keywords,
            &self.config.limit,
            &mut self.rng,
        );

        self.format(&reply).unwrap_or_else(|| CANNED_REPLY.to_string())
    }

    fn format(&self, reply: &[SymbolId]) -> Option<String> {
        if reply.is_empty() {
            return None;
        }
        let words: Vec<String> = reply
            .iter()
            .map(|&id| String::from_utf8_lossy(self.model.dictionary().resolve(id)).into_owned())
            .collect();
        Some(capitalize(&words))
    }

    /// Generate an initial greeting (before any user input).
    pub fn greet(&mut self) -> String {
        if self.greetings.is_empty() {
            return DEFAULT_GREETING.to_string();
        }

        // Pick a random greeting keyword.
        let idx = self.rng.random_range(0..self.greetings.len());
        let greeting = self.greetings[idx].to_uppercase();

        let mut keywords = Keywords::new();
        if let Some(id) = self.model.dictionary().lookup(greeting.as_bytes()) {
            keywords.insert(id, false);
        }

        let reply = generate_reply(
            &self.model,
            &self.crosstab,
            &[],
            &keywords,
            &self.config.limit,
            &mut self.rng,
        );
        self.format(&reply).unwrap_or_else(|| DEFAULT_GREETING.to_string())
    }

    /// Share of all keyword co-occurrence that `word` takes part in, from 0
    /// (unseen) to 1.
    pub fn ask_weight(&self, word: &str) -> f64 {
        self.model
            .dictionary()
            .lookup(word.to_uppercase().as_bytes())
            .map_or(0.0, |id| self.crosstab.ask(id))
    }

    /// Save the model to `path`. Saving back to the loaded file releases its lock.
    pub fn save_brain(&mut self, path: &Path) -> Result<(), BrainError> {
        self.model.save(path)
    }

    /// Replace the model with the brain stored at `path`.
    ///
    /// Any brain file the current model holds is unlocked first, even if the
    /// load then fails. The brain's own order wins over the configured one.
    /// The crosstab is not part of the brain file and starts empty.
    pub fn load_brain(&mut self, path: &Path) -> Result<(), BrainError> {
        self.model.release_lock();
        let model = Model::load(path, self.config.node_budget, self.config.lock)?;
        if model.order() != self.config.order {
            info!(
                configured = self.config.order,
                loaded = model.order(),
                "brain order overrides configuration"
            );
            self.config.order = model.order();
        }
        self.model = model;
        self.crosstab = Crosstab::new(self.config.crosstab_capacity.max(1));
        Ok(())
    }

    /// Write a human-readable dump of the model to `path`.
    pub fn dump(&self, path: &Path, flags: DumpFlags) -> Result<(), BrainError> {
        self.model.dump(path, flags)
    }

    /// Train from a text file (one sentence per line).
    ///
    /// Returns how many lines were long enough to learn from.
    pub fn train_from_file(&mut self, path: &Path) -> io::Result<usize> {
        let content = fs::read_to_string(path)?;
        let mut learned = 0;
        for line in content.lines() {
            let trimmed = line.trim();
            // Skip comments and empty lines.
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if self.learn(trimmed) {
                learned += 1;
            }
        }
        info!(path = %path.display(), learned, nodes = self.model.node_count(), "trained");
        Ok(learned)
    }

    /// Get a reference to the underlying model (for inspection/testing).
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn crosstab(&self) -> &Crosstab {
        &self.crosstab
    }
}

/// Load a keyword list file (one word per line, comments with #).
pub fn load_word_list(path: &Path) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_uppercase())
        .collect())
}

/// Load a swap file (space/tab-separated pairs, one per line).
pub fn load_swap_file(path: &Path) -> io::Result<Vec<(String, String)>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let from = parts.next()?.to_uppercase();
            let to = parts.next()?.to_uppercase();
            Some((from, to))
        })
        .collect())
}
