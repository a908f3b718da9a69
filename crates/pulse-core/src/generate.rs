//! Generative model abstraction.
//!
//! A [`Generator`] turns one prompt into a finite, non-restartable stream
//! of text chunks. Providers (Gemini, OpenAI) live in the app crate.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// Stream of generated text chunks, in arrival order.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Start generating. Errors before the first chunk surface here;
    /// errors mid-stream surface as `Err` items.
    async fn stream(&self, prompt: &str) -> Result<TextStream>;
}

/// Drain a stream, concatenating chunks in arrival order. The first
/// error aborts collection.
pub async fn collect_text(mut stream: TextStream) -> Result<String> {
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_collect_concatenates_in_order() {
        let s: TextStream = stream::iter(vec![
            Ok("Summary".to_string()),
            Ok(": ".to_string()),
            Ok("on track".to_string()),
        ])
        .boxed();
        assert_eq!(collect_text(s).await.unwrap(), "Summary: on track");
    }

    #[tokio::test]
    async fn test_collect_stops_at_error() {
        let s: TextStream = stream::iter(vec![
            Ok("partial".to_string()),
            Err(anyhow::anyhow!("connection reset")),
            Ok("never".to_string()),
        ])
        .boxed();
        let err = collect_text(s).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
