use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    EmbeddingProvider, ProviderResult, VisionSummarizer, encode_image, require_key, send_json,
};
use crate::error::ProviderError;
use crate::utils::guess_mime;

/// Gemini REST 接口
pub struct GeminiClient {
    pub client: Client,
    /// 例：https://generativelanguage.googleapis.com/v1beta
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url.trim_end_matches('/'), model, method)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let key = require_key(&self.api_key, "GOOGLE_API_KEY")?;
        let body = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] },
        });
        let request = self
            .client
            .post(self.url(&self.embedding_model, "embedContent"))
            .query(&[("key", key)])
            .json(&body);
        let response: EmbedResponse = send_json("gemini", "embed", request).await?;
        if response.embedding.values.is_empty() {
            return Err(ProviderError::Malformed("返回了空向量".into()));
        }
        Ok(response.embedding.values)
    }
}

#[async_trait]
impl VisionSummarizer for GeminiClient {
    async fn describe(&self, image: &[u8], prompt: &str) -> ProviderResult<String> {
        let key = require_key(&self.api_key, "GOOGLE_API_KEY")?;
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": guess_mime(image), "data": encode_image(image) } },
                ],
            }],
            "generationConfig": { "maxOutputTokens": self.max_tokens },
        });
        let request = self
            .client
            .post(self.url(&self.vision_model, "generateContent"))
            .query(&[("key", key)])
            .json(&body);
        let response: GenerateResponse = send_json("gemini", "describe", request).await?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("没有返回候选结果".into()))?;
        let text = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        Ok(text)
    }
}
