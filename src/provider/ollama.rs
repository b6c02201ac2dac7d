use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingProvider, ProviderResult, VisionSummarizer, encode_image, send_json};
use crate::error::ProviderError;

/// 本地 Ollama 服务
pub struct OllamaClient {
    pub client: Client,
    /// 例：http://localhost:11434
    pub host: String,
    pub embedding_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let request = self
            .client
            .post(self.url("embeddings"))
            .json(&json!({ "model": self.embedding_model, "prompt": text }));
        let response: EmbeddingResponse = send_json("ollama", "embed", request).await?;
        if response.embedding.is_empty() {
            return Err(ProviderError::Malformed("返回了空向量".into()));
        }
        Ok(response.embedding)
    }
}

#[async_trait]
impl VisionSummarizer for OllamaClient {
    async fn describe(&self, image: &[u8], prompt: &str) -> ProviderResult<String> {
        let body = json!({
            "model": self.vision_model,
            "prompt": prompt,
            "images": [encode_image(image)],
            "stream": false,
            "options": { "num_predict": self.max_tokens },
        });
        let request = self.client.post(self.url("generate")).json(&body);
        let response: GenerateResponse = send_json("ollama", "describe", request).await?;
        Ok(response.response)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};

    use super::*;
    use crate::provider::http_client;

    #[tokio::test]
    async fn test_embed_and_describe() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embeddings")
            .match_body(Matcher::PartialJsonString(r#"{"model":"nomic-embed-text"}"#.into()))
            .with_status(200)
            .with_body(r#"{"embedding":[0.1,0.2]}"#)
            .create_async()
            .await;
        let _mock = server
            .mock("POST", "/api/generate")
            .match_body(Matcher::PartialJsonString(r#"{"stream":false}"#.into()))
            .with_status(200)
            .with_body(r#"{"response":"a dog"}"#)
            .create_async()
            .await;

        let ollama = OllamaClient {
            client: http_client(Duration::from_secs(5)).unwrap(),
            host: server.url(),
            embedding_model: "nomic-embed-text".into(),
            vision_model: "llava".into(),
            max_tokens: 128,
        };
        assert_eq!(ollama.embed("dog").await.unwrap(), vec![0.1, 0.2]);
        assert_eq!(ollama.describe(b"img", "describe").await.unwrap(), "a dog");
    }
}
