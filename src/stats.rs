//! Index statistics and health overview.
//!
//! Summarizes what the persisted index holds: document counts per class,
//! vector coverage, the embedding model it was built with, and the bundle
//! size on disk. Requires an existing index; it never triggers a build.

use crate::config::Config;
use crate::embedding;
use crate::error::Result;
use crate::index::SearchIndex;

pub async fn run_stats(config: &Config) -> Result<()> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    let search_index = SearchIndex::load(config, embedder).await?;
    let stats = search_index.stats().await?;

    let file_size = std::fs::metadata(&config.index.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Tome — Index Stats");
    println!("==================");
    println!();
    println!("  Bundle:      {}", config.index.path.display());
    println!("  Size:        {}", format_bytes(file_size));
    println!("  Model:       {} ({} dims)", stats.model, stats.dims);
    if let Some(ts) = stats.created_at {
        let built = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default();
        println!("  Built:       {}", built);
    }
    println!();
    println!("  Documents:   {}", stats.documents);
    for (doc_type, count) in &stats.by_type {
        println!("    {:<16} {}", doc_type, count);
    }
    println!(
        "  Vectors:     {} / {} ({}%)",
        stats.vectors,
        stats.documents,
        if stats.documents > 0 {
            (stats.vectors * 100) / stats.documents
        } else {
            0
        }
    );

    search_index.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
