//! Random expansion of a start nonterminal into a sentence of terminals.
//!
//! The expander keeps its own stack of partially walked productions instead of
//! recursing, so grammar depth is limited by [`GrammarConfig`] rather than by
//! the thread's call stack.
//!
//! [`GrammarConfig`]: crate::grammar::GrammarConfig

use std::fmt;

use log::trace;
use serde::Serialize;

use crate::grammar::{Grammar, Symbol, nonterminal_key};
use crate::utils::{Ceiling, ChoiceSource, GrammarError, Result, ThreadRngSource};

/// The terminals produced by one expansion, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Sentence {
    tokens: Vec<String>,
}

impl Sentence {
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// A production being walked: its symbols and the index of the next one
struct Frame<'g> {
    symbols: &'g [Symbol],
    next: usize,
}

/// Expands nonterminals against a borrowed, read-only grammar
#[derive(Debug, Clone, Copy)]
pub struct Expander<'g> {
    grammar: &'g Grammar,
}

impl<'g> Expander<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Expander { grammar }
    }

    /// Expand `start` once, drawing every alternative from `source`.
    ///
    /// A bare name such as `start` is looked up as `<start>`.
    pub fn expand<C: ChoiceSource + ?Sized>(&self, start: &str, source: &mut C) -> Result<Sentence> {
        let start = nonterminal_key(start);
        let config = self.grammar.config();
        let mut expansions = 0;
        let mut tokens = Vec::new();
        let mut stack = vec![self.open(&start, source, &mut expansions)?];

        while let Some(frame) = stack.last_mut() {
            let symbols = frame.symbols;
            let Some(symbol) = symbols.get(frame.next) else {
                stack.pop();
                continue;
            };
            frame.next += 1;

            match symbol {
                Symbol::Terminal(word) => tokens.push(word.clone()),
                Symbol::NonTerminal(name) => {
                    if stack.len() >= config.max_recursion_depth {
                        return Err(GrammarError::GrammarNonTerminating {
                            symbol: name.clone(),
                            ceiling: Ceiling::Depth(config.max_recursion_depth),
                        });
                    }
                    let child = self.open(name, source, &mut expansions)?;
                    stack.push(child);
                }
            }
        }

        Ok(Sentence { tokens })
    }

    /// Expand `start` once using the thread-local generator
    pub fn generate(&self, start: &str) -> Result<Sentence> {
        self.expand(start, &mut ThreadRngSource)
    }

    /// Run `count` independent expansions. A failure only fills its own slot.
    pub fn generate_many(&self, start: &str, count: usize) -> Vec<Result<Sentence>> {
        let mut source = ThreadRngSource;
        (0..count).map(|_| self.expand(start, &mut source)).collect()
    }

    /// Resolve `name`, choose one of its alternatives and start walking it
    fn open<C: ChoiceSource + ?Sized>(
        &self,
        name: &str,
        source: &mut C,
        expansions: &mut usize,
    ) -> Result<Frame<'g>> {
        let grammar: &'g Grammar = self.grammar;
        let definition = grammar
            .get(name)
            .ok_or_else(|| GrammarError::UndefinedNonterminal(name.to_string()))?;

        *expansions += 1;
        let limit = grammar.config().max_expansions;
        if *expansions > limit {
            return Err(GrammarError::GrammarNonTerminating {
                symbol: name.to_string(),
                ceiling: Ceiling::Expansions(limit),
            });
        }

        let production = definition.random_production(source);
        trace!("{} -> {}", definition.nonterminal(), production);
        Ok(Frame {
            symbols: production.symbols(),
            next: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{GrammarBuilder, GrammarConfig};
    use crate::utils::{FixedChoices, RngSource};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    const HELLO_WORLD: &str = "
{
<start>
1
<greeting> <name>
}

{
<greeting>
2
hi
hello there
}

{
<name>
1
World
}
";

    #[test]
    fn test_terminal_only_production_is_verbatim() {
        let grammar = Grammar::parse("{\n<s>\n1\nthe quick brown fox\n}\n").unwrap();
        let sentence = grammar.generate("<s>").unwrap();
        assert_eq!(sentence.tokens(), &["the", "quick", "brown", "fox"]);
        assert_eq!(sentence.to_string(), "the quick brown fox");
    }

    #[test]
    fn test_single_alternative_is_deterministic() {
        let grammar = GrammarBuilder::new()
            .add_rule("s", &["a", "<t>", "c"])
            .add_rule("t", &["b"])
            .build()
            .unwrap();
        let expander = Expander::new(&grammar);
        for _ in 0..20 {
            assert_eq!(expander.generate("s").unwrap().to_string(), "a b c");
        }
    }

    #[test]
    fn test_greeting_never_mixes_alternatives() {
        let grammar = Grammar::parse(HELLO_WORLD).unwrap();
        let expander = Expander::new(&grammar);
        for _ in 0..100 {
            let text = expander.generate("<greeting>").unwrap().to_string();
            assert!(text == "hi" || text == "hello there", "unexpected: {}", text);
        }
    }

    #[test]
    fn test_end_to_end_start() {
        let grammar = Grammar::parse(HELLO_WORLD).unwrap();
        let mut seen = HashMap::new();
        for result in Expander::new(&grammar).generate_many("<start>", 200) {
            let text = result.unwrap().to_string();
            assert!(
                text == "hi World" || text == "hello there World",
                "unexpected: {}",
                text
            );
            *seen.entry(text).or_insert(0) += 1;
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_uniform_choice() {
        let grammar = GrammarBuilder::new()
            .add_rule("pick", &["a"])
            .add_rule("pick", &["b"])
            .add_rule("pick", &["c"])
            .add_rule("pick", &["d"])
            .build()
            .unwrap();
        let expander = Expander::new(&grammar);
        let mut source = RngSource(StdRng::seed_from_u64(0x5eed));
        let rounds = 40_000;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..rounds {
            let sentence = expander.expand("pick", &mut source).unwrap();
            *counts.entry(sentence.to_string()).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for (word, count) in counts {
            let frequency = count as f64 / rounds as f64;
            assert!(
                (frequency - 0.25).abs() < 0.02,
                "{} chosen with frequency {}",
                word,
                frequency
            );
        }
    }

    #[test]
    fn test_fixed_choices_are_scripted() {
        let grammar = Grammar::parse(HELLO_WORLD).unwrap();
        let expander = Expander::new(&grammar);

        let mut first = FixedChoices::first();
        assert_eq!(expander.expand("<start>", &mut first).unwrap().to_string(), "hi World");
        assert_eq!(first.draws(), 3);

        let mut second = FixedChoices::new(vec![1]);
        assert_eq!(
            expander.expand("<start>", &mut second).unwrap().to_string(),
            "hello there World"
        );
    }

    #[test]
    fn test_repeated_nonterminal_resolves_independently() {
        let grammar = GrammarBuilder::new()
            .add_rule("pair", &["<coin>", "<coin>"])
            .add_rule("coin", &["heads"])
            .add_rule("coin", &["tails"])
            .build()
            .unwrap();
        let mut source = FixedChoices::new(vec![0, 0, 1]);
        let sentence = Expander::new(&grammar).expand("pair", &mut source).unwrap();
        assert_eq!(sentence.to_string(), "heads tails");
    }

    #[test]
    fn test_recursive_grammar_bottoms_out() {
        let grammar = GrammarBuilder::new()
            .add_rule("list", &["item"])
            .add_rule("list", &["item", ",", "<list>"])
            .build()
            .unwrap();
        let expander = Expander::new(&grammar);
        let mut source = RngSource(StdRng::seed_from_u64(3));
        for _ in 0..200 {
            let sentence = expander.expand("list", &mut source).unwrap();
            assert!(!sentence.is_empty());
            assert_eq!(sentence.tokens().last().map(String::as_str), Some("item"));
        }
    }

    #[test]
    fn test_undefined_nonterminal() {
        let grammar = GrammarBuilder::new()
            .add_rule("start", &["before", "<missing>"])
            .build()
            .unwrap();
        match grammar.generate("<start>") {
            Err(GrammarError::UndefinedNonterminal(name)) => assert_eq!(name, "<missing>"),
            other => panic!("expected UndefinedNonterminal, got {:?}", other),
        }
        assert!(matches!(
            grammar.generate("<nowhere>"),
            Err(GrammarError::UndefinedNonterminal(_))
        ));
    }

    #[test]
    fn test_non_terminating_depth() {
        let config = GrammarConfig {
            max_recursion_depth: 50,
            ..GrammarConfig::default()
        };
        let grammar = GrammarBuilder::new()
            .config(config)
            .add_rule("loop", &["<loop>", "again"])
            .add_rule("fine", &["done"])
            .build()
            .unwrap();

        match grammar.generate("loop") {
            Err(GrammarError::GrammarNonTerminating { symbol, ceiling }) => {
                assert_eq!(symbol, "<loop>");
                assert_eq!(ceiling, Ceiling::Depth(50));
            }
            other => panic!("expected GrammarNonTerminating, got {:?}", other),
        }

        // The store is untouched, other symbols still expand.
        assert_eq!(grammar.generate("fine").unwrap().to_string(), "done");
    }

    #[test]
    fn test_non_terminating_expansions() {
        let config = GrammarConfig {
            max_recursion_depth: 10_000,
            max_expansions: 500,
        };
        let grammar = GrammarBuilder::new()
            .config(config)
            .add_rule("tree", &["<tree>", "<tree>"])
            .build()
            .unwrap();

        assert!(matches!(
            grammar.generate("tree"),
            Err(GrammarError::GrammarNonTerminating {
                ceiling: Ceiling::Expansions(500),
                ..
            })
        ));
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let depth = 5_000;
        let mut grammar = Grammar::with_config(GrammarConfig {
            max_recursion_depth: depth + 1,
            ..GrammarConfig::default()
        });
        for i in 0..depth {
            let next = format!("<n{}>", i + 1);
            grammar.add_rule(&format!("<n{}>", i), &[next.as_str()]).unwrap();
        }
        grammar.add_rule(&format!("<n{}>", depth), &["end"]).unwrap();

        let sentence = grammar.generate("<n0>").unwrap();
        assert_eq!(sentence.tokens(), &["end"]);
    }

    #[test]
    fn test_concurrent_expansion() {
        let grammar = Grammar::parse(HELLO_WORLD).unwrap();
        std::thread::scope(|scope| {
            for seed in 0..4 {
                let grammar = &grammar;
                scope.spawn(move || {
                    let expander = Expander::new(grammar);
                    let mut source = RngSource(StdRng::seed_from_u64(seed));
                    for _ in 0..100 {
                        let sentence = expander.expand("<start>", &mut source).unwrap();
                        assert_eq!(sentence.tokens().last().map(String::as_str), Some("World"));
                    }
                });
            }
        });
    }

    #[test]
    fn test_sentence_serializes_as_array() {
        let grammar = Grammar::parse(HELLO_WORLD).unwrap();
        let sentence = grammar.generate("<name>").unwrap();
        assert_eq!(serde_json::to_string(&sentence).unwrap(), r#"["World"]"#);
    }
}
