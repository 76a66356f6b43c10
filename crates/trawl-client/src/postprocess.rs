use std::sync::Arc;

use htmd::HtmlToMarkdown;
use trawl_core::error::ScrapeError;
use trawl_core::models::HttpResponse;
use trawl_core::traits::{PostProcessArgs, PostProcessor};

/// HTML-to-Markdown post-processor using htmd.
///
/// Strips non-content elements (script, style, nav, etc.). Pages that
/// convert to nothing are treated as failures so they are retried.
///
/// Honours the `max_chars` kwarg: the Markdown is cut to at most that many
/// characters.
pub struct MarkdownPostProcessor {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for MarkdownPostProcessor {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl MarkdownPostProcessor {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for MarkdownPostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor for MarkdownPostProcessor {
    type Output = String;

    fn process(
        &self,
        html: &str,
        response: &HttpResponse,
        kwargs: &PostProcessArgs,
    ) -> Result<String, ScrapeError> {
        let markdown = self
            .converter
            .convert(html)
            .map_err(|e| ScrapeError::PostProcess(e.to_string()))?;
        let markdown = markdown.trim();
        if markdown.is_empty() {
            return Err(ScrapeError::PostProcess(format!(
                "no content left after cleaning {}",
                response.url
            )));
        }

        Ok(match kwargs.get("max_chars").and_then(|v| v.as_u64()) {
            Some(max) => markdown.chars().take(max as usize).collect(),
            None => markdown.to_string(),
        })
    }
}

/// Parses the response body as JSON, for APIs scraped with POST payloads.
///
/// Honours the `pointer` kwarg: a JSON pointer (`/data/items`) selecting
/// the part of the document to keep.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPostProcessor;

impl PostProcessor for JsonPostProcessor {
    type Output = serde_json::Value;

    fn process(
        &self,
        body: &str,
        response: &HttpResponse,
        kwargs: &PostProcessArgs,
    ) -> Result<serde_json::Value, ScrapeError> {
        let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
            ScrapeError::PostProcess(format!("invalid JSON from {}: {e}", response.url))
        })?;

        match kwargs.get("pointer").and_then(|v| v.as_str()) {
            Some(pointer) => value.pointer(pointer).cloned().ok_or_else(|| {
                ScrapeError::PostProcess(format!("{pointer} not found in {}", response.url))
            }),
            None => Ok(value),
        }
    }
}
