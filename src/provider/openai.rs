use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    EmbeddingProvider, ProviderResult, VisionSummarizer, encode_image, require_key, send_json,
};
use crate::error::ProviderError;
use crate::utils::guess_mime;

/// OpenAI 以及兼容 OpenAI 协议的服务
pub struct OpenAiClient {
    pub client: Client,
    /// 例：https://api.openai.com/v1
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

impl OpenAiClient {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let key = require_key(&self.api_key, "OPENAI_API_KEY")?;
        let request = self
            .client
            .post(self.url("embeddings"))
            .bearer_auth(key)
            .json(&json!({ "model": self.embedding_model, "input": text }));
        let response: EmbeddingsResponse = send_json("openai", "embed", request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Malformed("返回了空向量".into()))
    }
}

#[async_trait]
impl VisionSummarizer for OpenAiClient {
    async fn describe(&self, image: &[u8], prompt: &str) -> ProviderResult<String> {
        let key = require_key(&self.api_key, "OPENAI_API_KEY")?;
        let url = format!("data:{};base64,{}", guess_mime(image), encode_image(image));
        let body = json!({
            "model": self.vision_model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": url } },
                ],
            }],
        });
        let request = self.client.post(self.url("chat/completions")).bearer_auth(key).json(&body);
        let response: ChatResponse = send_json("openai", "describe", request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("没有返回候选结果".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}
