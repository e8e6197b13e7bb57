//! The `tome search` command: retrieval without generation.

use crate::config::Config;
use crate::error::Result;
use crate::index;

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let search_index = index::open_pipeline(config).await?;
    let k = limit.unwrap_or(config.retrieval.k);
    let hits = search_index.search(query, k).await?;

    if hits.is_empty() {
        println!("No results.");
        search_index.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            hit.score,
            hit.document.kind.type_name(),
            hit.document.id
        );
        println!("    {}", hit.document.content);
    }

    search_index.close().await;
    Ok(())
}
