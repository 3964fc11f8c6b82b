use rsg::{Expander, Grammar};
use std::error::Error;

/// Expand the bundled grammars a few times each
fn main() -> Result<(), Box<dyn Error>> {
    let poem = Grammar::parse(include_str!("../grammars/poem.g"))?;
    println!("Poems ({} definitions):", poem.len());
    for (i, result) in Expander::new(&poem).generate_many("<start>", 3).into_iter().enumerate() {
        println!("{}. {}", i + 1, result?);
    }

    let excuse = Grammar::parse(include_str!("../grammars/excuse.g"))?;
    println!("\nExcuses ({} definitions):", excuse.len());
    for i in 1..=3 {
        println!("{}. {}", i, excuse.generate("start")?);
    }

    // Grammars can also be built in code.
    let mut greeting = Grammar::new();
    greeting.add_rule("start", &["<greeting>", "<name>"])?;
    greeting.add_rule("greeting", &["hi"])?;
    greeting.add_rule("greeting", &["hello", "there"])?;
    greeting.add_rule("name", &["World"])?;
    println!("\nGreeting: {}", greeting.generate("start")?);
    println!("\nAs grammar text:\n{}", greeting);

    Ok(())
}
