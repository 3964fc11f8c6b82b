use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::expander::{Expander, Sentence};
use crate::utils::{ChoiceSource, GrammarError, Result};

/// First character of every nonterminal reference
pub const NONTERMINAL_MARKER: char = '<';

/// Closing character of a nonterminal name
pub const NONTERMINAL_CLOSE: char = '>';

/// Pattern every definition header must match, e.g. `<start>`
fn header_pattern() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    // The pattern is a literal and always compiles.
    HEADER.get_or_init(|| Regex::new(r"^<[^<>\s]+>$").expect("valid header pattern"))
}

/// Reject a nonterminal name that would not survive being written out as a header
fn check_header(nonterminal: &str) -> Result<()> {
    if header_pattern().is_match(nonterminal) {
        Ok(())
    } else {
        Err(GrammarError::InvalidRule(format!(
            "`{}` is not a nonterminal name such as `<start>`",
            nonterminal
        )))
    }
}

/// Reject a word that would not read back as the same single token
fn check_word(word: &str) -> Result<()> {
    if word.is_empty() {
        return Err(GrammarError::InvalidRule("empty word".to_string()));
    }
    if word.chars().any(char::is_whitespace) {
        return Err(GrammarError::InvalidRule(format!(
            "`{}` contains whitespace",
            word
        )));
    }
    if word == "}" {
        return Err(GrammarError::InvalidRule(
            "`}` cannot be used as a word".to_string(),
        ));
    }
    Ok(())
}

/// Turn a bare name such as `start` into the `<start>` key used by the store.
/// Names that already carry the marker are returned unchanged.
pub fn nonterminal_key(name: &str) -> Cow<'_, str> {
    if name.starts_with(NONTERMINAL_MARKER) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{}{}{}", NONTERMINAL_MARKER, name, NONTERMINAL_CLOSE))
    }
}

/// One word of a production, either emitted verbatim or expanded further
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// A terminal word, emitted as-is
    Terminal(String),
    /// A reference to a definition, resolved when the expander reaches it
    NonTerminal(String),
}

impl Symbol {
    /// Classify a word by its text alone: a leading `<` makes it a nonterminal
    pub fn classify(word: &str) -> Symbol {
        if word.starts_with(NONTERMINAL_MARKER) {
            Symbol::NonTerminal(word.to_string())
        } else {
            Symbol::Terminal(word.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Symbol::Terminal(text) | Symbol::NonTerminal(text) => text,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Symbol::Terminal(_))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alternative of a definition: a non-empty, ordered run of symbols
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Production {
    symbols: Vec<Symbol>,
}

impl Production {
    pub fn new(symbols: Vec<Symbol>) -> Result<Self> {
        if symbols.is_empty() {
            return Err(GrammarError::EmptyProduction(
                "a production needs at least one symbol".to_string(),
            ));
        }
        for symbol in &symbols {
            check_word(symbol.as_str())?;
        }
        Ok(Production { symbols })
    }

    /// Split a line on whitespace and classify every word
    pub fn from_line(line: &str) -> Result<Self> {
        let symbols: Vec<Symbol> = line.split_whitespace().map(Symbol::classify).collect();
        if symbols.is_empty() {
            return Err(GrammarError::EmptyProduction(line.to_string()));
        }
        Ok(Production { symbols })
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn is_terminal_only(&self) -> bool {
        self.symbols.iter().all(Symbol::is_terminal)
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, symbol) in self.symbols.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", symbol)?;
        }
        Ok(())
    }
}

/// A nonterminal together with its alternatives, in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    nonterminal: String,
    productions: Vec<Production>,
}

impl Definition {
    pub fn new(nonterminal: &str, productions: Vec<Production>) -> Result<Self> {
        check_header(nonterminal)?;
        if productions.is_empty() {
            return Err(GrammarError::EmptyDefinition(nonterminal.to_string()));
        }
        Ok(Definition {
            nonterminal: nonterminal.to_string(),
            productions,
        })
    }

    pub fn nonterminal(&self) -> &str {
        &self.nonterminal
    }

    pub fn productions(&self) -> &[Production] {
        &self.productions
    }

    /// Pick one alternative with a single fresh draw from `source`.
    ///
    /// Panics if the source breaks its contract and returns an index out of range.
    pub fn random_production<C: ChoiceSource + ?Sized>(&self, source: &mut C) -> &Production {
        let index = source.choose(self.productions.len());
        &self.productions[index]
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "{}", self.nonterminal)?;
        writeln!(f, "{}", self.productions.len())?;
        for production in &self.productions {
            writeln!(f, "{}", production)?;
        }
        writeln!(f, "}}")
    }
}

/// Limits applied while expanding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrammarConfig {
    /// Maximum number of nested nonterminals open at once
    pub max_recursion_depth: usize,
    /// Maximum number of nonterminal expansions in one sentence
    pub max_expansions: usize,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        GrammarConfig {
            max_recursion_depth: 1000,
            max_expansions: 1_000_000,
        }
    }
}

impl GrammarConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: GrammarConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| {
            GrammarError::GrammarSourceUnreadable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_recursion_depth == 0 {
            return Err(GrammarError::InvalidConfig(
                "max_recursion_depth must be positive".to_string(),
            ));
        }
        if self.max_expansions == 0 {
            return Err(GrammarError::InvalidConfig(
                "max_expansions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The grammar store: every definition keyed by its nonterminal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grammar {
    definitions: HashMap<String, Definition>,
    config: GrammarConfig,
}

impl Grammar {
    /// Create a new empty grammar
    pub fn new() -> Self {
        Grammar::default()
    }

    /// Create a new empty grammar with custom configuration
    pub fn with_config(config: GrammarConfig) -> Self {
        Grammar {
            definitions: HashMap::new(),
            config,
        }
    }

    /// Parse grammar text in the brace-delimited block format
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_config(text, GrammarConfig::default())
    }

    pub fn parse_with_config(text: &str, config: GrammarConfig) -> Result<Self> {
        let mut grammar = Grammar::with_config(config);
        let mut parser = BlockParser::new(text);
        while parser.next_block() {
            let definition = parser.parse_definition()?;
            debug!(
                "parsed {} with {} alternatives",
                definition.nonterminal(),
                definition.productions().len()
            );
            grammar.insert(definition);
        }
        Ok(grammar)
    }

    /// Read everything from `reader`, then parse it
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::parse(&text)
    }

    /// Parse a grammar from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_config(path, GrammarConfig::default())
    }

    pub fn from_file_with_config<P: AsRef<Path>>(path: P, config: GrammarConfig) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| {
            GrammarError::GrammarSourceUnreadable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let grammar = Self::parse_with_config(&text, config)?;
        info!(
            "loaded {} definitions from {}",
            grammar.len(),
            path.display()
        );
        Ok(grammar)
    }

    /// Insert a definition, replacing any earlier one for the same nonterminal
    pub fn insert(&mut self, definition: Definition) -> Option<Definition> {
        let previous = self
            .definitions
            .insert(definition.nonterminal.clone(), definition);
        if let Some(previous) = &previous {
            warn!("{} is defined more than once, keeping the last definition", previous.nonterminal);
        }
        previous
    }

    /// Append one production to a nonterminal, creating its definition when absent.
    /// A bare name such as `subject` is stored as `<subject>`.
    ///
    /// Names and words are held to the same rules as the file format, so the
    /// grammar's `Display` output always parses back to the same store.
    pub fn add_rule(&mut self, nonterminal: &str, elements: &[&str]) -> Result<&mut Self> {
        let key = nonterminal_key(nonterminal).into_owned();
        check_header(&key)?;
        if elements.is_empty() {
            return Err(GrammarError::EmptyProduction(key));
        }
        for word in elements {
            check_word(word)?;
        }
        let symbols = elements.iter().map(|word| Symbol::classify(word)).collect();
        let production = Production { symbols };

        match self.definitions.get_mut(&key) {
            Some(definition) => definition.productions.push(production),
            None => {
                self.definitions.insert(
                    key.clone(),
                    Definition {
                        nonterminal: key,
                        productions: vec![production],
                    },
                );
            }
        }
        Ok(self)
    }

    pub fn get(&self, nonterminal: &str) -> Option<&Definition> {
        self.definitions.get(nonterminal)
    }

    /// Check if the grammar contains a specific nonterminal
    pub fn contains(&self, nonterminal: &str) -> bool {
        self.definitions.contains_key(nonterminal)
    }

    /// Number of distinct nonterminals defined
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions in no particular order
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    pub fn config(&self) -> &GrammarConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GrammarConfig) {
        self.config = config;
    }

    /// Expand `start` once with the thread-local generator
    pub fn generate(&self, start: &str) -> Result<Sentence> {
        Expander::new(self).generate(start)
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.definitions.keys().collect();
        names.sort();
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", self.definitions[name])?;
        }
        Ok(())
    }
}

/// Walks grammar text block by block, tracking line numbers for errors
struct BlockParser<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
    block: usize,
}

impl<'a> BlockParser<'a> {
    fn new(text: &'a str) -> Self {
        BlockParser {
            text,
            pos: 0,
            line: 1,
            block: 0,
        }
    }

    /// Skip to just past the next `{`. Returns false at end of input.
    fn next_block(&mut self) -> bool {
        let text = self.text;
        let rest = &text[self.pos..];
        match rest.find('{') {
            Some(offset) => {
                self.line += rest[..offset].matches('\n').count();
                self.pos += offset + 1;
                self.block += 1;
                true
            }
            None => {
                self.pos = self.text.len();
                false
            }
        }
    }

    /// Next non-blank line inside the current block, trimmed, with its line number
    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let text = self.text;
        while self.pos < text.len() {
            let rest = &text[self.pos..];
            let line = self.line;
            let content = match rest.find('\n') {
                Some(end) => {
                    self.pos += end + 1;
                    self.line += 1;
                    &rest[..end]
                }
                None => {
                    self.pos = text.len();
                    rest
                }
            };
            let content = content.trim();
            if !content.is_empty() {
                return Some((line, content));
            }
        }
        None
    }

    fn malformed(&self, line: usize, reason: impl Into<String>) -> GrammarError {
        GrammarError::MalformedGrammar {
            block: self.block,
            line,
            reason: reason.into(),
        }
    }

    fn parse_definition(&mut self) -> Result<Definition> {
        let (line, header) = self
            .next_line()
            .ok_or_else(|| self.malformed(self.line, "unexpected end of input, expected a nonterminal name"))?;
        if !header_pattern().is_match(header) {
            return Err(self.malformed(
                line,
                format!("expected a nonterminal such as `<start>`, found `{}`", header),
            ));
        }

        let (line, count_text) = self
            .next_line()
            .ok_or_else(|| self.malformed(self.line, "unexpected end of input, expected a production count"))?;
        let count: usize = count_text.parse().map_err(|_| {
            self.malformed(
                line,
                format!("expected a production count, found `{}`", count_text),
            )
        })?;
        if count == 0 {
            return Err(self.malformed(line, "a definition needs at least one production"));
        }

        let mut productions = Vec::with_capacity(count);
        for seen in 0..count {
            let (line, text) = self.next_line().ok_or_else(|| {
                self.malformed(
                    self.line,
                    format!("unexpected end of input after {} of {} productions", seen, count),
                )
            })?;
            if text == "}" {
                return Err(self.malformed(
                    line,
                    format!("block closed after {} of {} productions", seen, count),
                ));
            }
            productions.push(Production::from_line(text)?);
        }

        match self.next_line() {
            Some((_, "}")) => {}
            Some((line, other)) => {
                return Err(self.malformed(
                    line,
                    format!("expected `}}` after {} productions, found `{}`", count, other),
                ));
            }
            None => return Err(self.malformed(self.line, "unterminated block, expected `}`")),
        }

        Definition::new(header, productions)
    }
}

/// Builder for constructing Grammar instances
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    grammar: Grammar,
    error: Option<GrammarError>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        GrammarBuilder::default()
    }

    /// Set the configuration
    pub fn config(mut self, config: GrammarConfig) -> Self {
        self.grammar.config = config;
        self
    }

    /// Add one production; the first failure is reported by `build`
    pub fn add_rule(mut self, nonterminal: &str, elements: &[&str]) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.grammar.add_rule(nonterminal, elements) {
                self.error = Some(err);
            }
        }
        self
    }

    pub fn build(self) -> Result<Grammar> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.grammar),
        }
    }
}
