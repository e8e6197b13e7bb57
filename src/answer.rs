//! Prompt rendering and answer generation.
//!
//! Retrieved documents and the user's question are rendered into a fixed
//! prompt template and sent to an Ollama `/api/generate` endpoint. The
//! generated text comes back unmodified. Unlike the embedding client there
//! is no retry policy here: a generation failure surfaces immediately.

use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::synth::Document;

/// Render the retrieval context and the verbatim question into one prompt.
pub fn render_prompt(question: &str, documents: &[Document]) -> String {
    let mut context = String::new();
    for document in documents {
        context.push_str("- ");
        context.push_str(&document.content);
        context.push('\n');
    }
    if context.is_empty() {
        context.push_str("(no matching entries)\n");
    }

    format!(
        "You are an expert at answering questions about books.\n\
         \n\
         Here are some relevant book entries:\n\
         {}\n\
         Here is the user's question:\n\
         {}\n",
        context, question
    )
}

/// Client for the generative model collaborator.
pub struct Generator {
    model: String,
    url: String,
    num_threads: u32,
    client: reqwest::Client,
}

impl Generator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Generation(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            model: config.model.clone(),
            url: config.url.clone(),
            num_threads: config.num_threads,
            client,
        })
    }

    /// Answer a question against a set of retrieved documents.
    pub async fn answer(&self, question: &str, documents: &[Document]) -> Result<String> {
        let prompt = render_prompt(question, documents);
        self.generate(&prompt).await
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                // Inference parallelism hint for the model server; not a
                // concurrency primitive on our side.
                "num_thread": self.num_threads,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::Generation(format!("cannot reach model at {}: {}", self.url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!(
                "model returned {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("invalid response: {}", e)))?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Generation("response field missing from output".to_string()))
    }
}

/// `tome ask`: one question, one answer, no loop.
pub async fn run_ask(config: &crate::config::Config, question: &str) -> Result<()> {
    let search_index = crate::index::open_pipeline(config).await?;
    let generator = Generator::new(&config.generation)?;

    let hits = search_index.search(question, config.retrieval.k).await?;
    let documents: Vec<Document> = hits.into_iter().map(|hit| hit.document).collect();
    let answer = generator.answer(question, &documents).await?;

    println!("{}", answer);
    search_index.close().await;
    Ok(())
}
