use std::fmt;
use std::io;
use std::path::PathBuf;

use rand::Rng;
use thiserror::Error;

/// Custom error types for the sentence generator
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("Failed to open the file named \"{}\"", .path.display())]
    GrammarSourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed grammar in block #{block} (line {line}): {reason}")]
    MalformedGrammar {
        block: usize,
        line: usize,
        reason: String,
    },

    #[error("Undefined nonterminal: {0}")]
    UndefinedNonterminal(String),

    #[error("Grammar does not terminate while expanding {symbol}: {ceiling}")]
    GrammarNonTerminating { symbol: String, ceiling: Ceiling },

    #[error("Empty production: {0}")]
    EmptyProduction(String),

    #[error("Definition without productions: {0}")]
    EmptyDefinition(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for grammar operations
pub type Result<T> = std::result::Result<T, GrammarError>;

/// The expansion limit that stopped a runaway expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    /// Too many nested nonterminals were open at once
    Depth(usize),
    /// Too many nonterminals were expanded in a single sentence
    Expansions(usize),
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::Depth(limit) => write!(f, "recursion depth exceeded {}", limit),
            Ceiling::Expansions(limit) => write!(f, "more than {} expansions", limit),
        }
    }
}

/// Source of uniformly distributed alternative indices.
///
/// Every nonterminal the expander meets costs exactly one call. Implementors
/// must return a value in `0..n`; `n` is never zero.
pub trait ChoiceSource {
    fn choose(&mut self, n: usize) -> usize;
}

/// Draws from the thread-local generator
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSource;

impl ChoiceSource for ThreadRngSource {
    fn choose(&mut self, n: usize) -> usize {
        rand::thread_rng().gen_range(0..n)
    }
}

/// Adapts any `rand` generator, e.g. a seeded `StdRng` in tests
#[derive(Debug, Clone)]
pub struct RngSource<R>(pub R);

impl<R: Rng> ChoiceSource for RngSource<R> {
    fn choose(&mut self, n: usize) -> usize {
        self.0.gen_range(0..n)
    }
}

/// Replays a fixed script of indices, cycling when it runs out.
///
/// Each scripted value is reduced modulo the alternative count, so a script
/// of zeros always picks the first alternative.
#[derive(Debug, Clone)]
pub struct FixedChoices {
    script: Vec<usize>,
    position: usize,
}

impl FixedChoices {
    pub fn new(script: Vec<usize>) -> Self {
        FixedChoices {
            script,
            position: 0,
        }
    }

    /// Always picks the first alternative
    pub fn first() -> Self {
        FixedChoices::new(vec![0])
    }

    /// Number of choices made so far
    pub fn draws(&self) -> usize {
        self.position
    }
}

impl ChoiceSource for FixedChoices {
    fn choose(&mut self, n: usize) -> usize {
        if self.script.is_empty() {
            self.position += 1;
            return 0;
        }
        let value = self.script[self.position % self.script.len()];
        self.position += 1;
        value % n
    }
}
