//! RSG is a random sentence generator.
//!
//! A grammar is a set of definitions. Each one maps a nonterminal such as
//! `<start>` to a list of alternative productions. Expanding a nonterminal
//! picks one alternative uniformly at random and recursively expands every
//! nonterminal it contains, until only terminal words remain.
//!
//! # Example
//!
//! ```rust
//! use rsg::Grammar;
//!
//! let grammar = Grammar::parse(
//!     "{
//! <start>
//! 1
//! <greeting> World
//! }
//! {
//! <greeting>
//! 2
//! hi
//! hello there
//! }",
//! )
//! .unwrap();
//!
//! let text = grammar.generate("<start>").unwrap().to_string();
//! assert!(text == "hi World" || text == "hello there World");
//! ```

pub mod expander;
pub mod grammar;
pub mod utils;

pub use expander::{Expander, Sentence};
pub use grammar::{Definition, Grammar, GrammarBuilder, GrammarConfig, Production, Symbol};
pub use utils::{
    Ceiling, ChoiceSource, FixedChoices, GrammarError, Result, RngSource, ThreadRngSource,
};

/// The nonterminal the command-line driver expands
pub const DEFAULT_START: &str = "<start>";
