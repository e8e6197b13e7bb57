//! The interactive question loop.
//!
//! Reads one question per line from stdin, retrieves the top-k documents,
//! and prints the generated answer. A lone `q` (any case, surrounding
//! whitespace ignored) or end-of-input ends the session normally. Errors
//! from retrieval or generation propagate and terminate the process.

use std::io::{BufRead, Write};

use crate::answer::Generator;
use crate::config::Config;
use crate::error::Result;
use crate::index;
use crate::synth::Document;

pub async fn run_chat(config: &Config) -> Result<()> {
    let search_index = index::open_pipeline(config).await?;
    let generator = Generator::new(&config.generation)?;

    println!("Book Q&A: ask anything about the catalog (type 'q' to quit)");
    println!("------------------------------------------------------------");

    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        print!("\nAsk your question: ");
        let _ = std::io::stdout().flush();

        line.clear();
        let bytes_read = stdin.lock().read_line(&mut line).unwrap_or(0);
        if bytes_read == 0 {
            // End of input behaves like a quit.
            println!();
            break;
        }

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("q") {
            println!("Goodbye.");
            break;
        }

        let hits = search_index.search(question, config.retrieval.k).await?;
        let documents: Vec<Document> = hits.into_iter().map(|hit| hit.document).collect();
        let answer = generator.answer(question, &documents).await?;

        println!("\nAnswer:");
        println!("{}", answer);
        println!("--------------------------------------------------");
    }

    search_index.close().await;
    Ok(())
}
