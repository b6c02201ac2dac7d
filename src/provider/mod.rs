mod gemini;
mod ollama;
mod openai;
mod retry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::ValueEnum;
use log::debug;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

pub use self::gemini::GeminiClient;
pub use self::ollama::OllamaClient;
pub use self::openai::OpenAiClient;
pub use self::retry::{RetryPolicy, Retrying};
use crate::config::ProviderOptions;
use crate::error::ProviderError;
use crate::metrics;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// 文本嵌入模型，每个实现对应一个后端
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 模型名称，会被记录到集合配置中
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;
}

/// 视觉语言模型，根据提示词描述一张图片
#[async_trait]
pub trait VisionSummarizer: Send + Sync {
    async fn describe(&self, image: &[u8], prompt: &str) -> ProviderResult<String>;
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Google Gemini
    Gemini,
    /// OpenAI 及兼容接口
    Openai,
    /// 本地 Ollama 服务
    Ollama,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Openai => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_embedding_model(&self) -> &'static str {
        match self {
            Self::Gemini => "text-embedding-004",
            Self::Openai => "text-embedding-3-small",
            Self::Ollama => "nomic-embed-text",
        }
    }

    pub fn default_vision_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::Openai => "gpt-4o-mini",
            Self::Ollama => "llava",
        }
    }
}

/// 一组已经配置好的模型服务
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub summarizer: Arc<dyn VisionSummarizer>,
}

impl Providers {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, summarizer: Arc<dyn VisionSummarizer>) -> Self {
        Self { embedder, summarizer }
    }

    /// 根据命令行配置创建模型服务，所有调用都带有超时与重试
    pub fn from_options(opts: &ProviderOptions) -> ProviderResult<Self> {
        let client = http_client(Duration::from_secs(opts.request_timeout))?;
        let policy = RetryPolicy { max_attempts: opts.max_retries + 1, ..Default::default() };
        let kind = opts.provider;
        let embedding_model =
            opts.embedding_model.clone().unwrap_or_else(|| kind.default_embedding_model().into());
        let vision_model =
            opts.vision_model.clone().unwrap_or_else(|| kind.default_vision_model().into());
        debug!("使用 {} 后端: 嵌入模型 {}, 视觉模型 {}", kind.name(), embedding_model, vision_model);

        let providers = match kind {
            ProviderKind::Gemini => {
                let inner = GeminiClient {
                    client,
                    base_url: opts.gemini_base_url.clone(),
                    api_key: opts.google_api_key.clone(),
                    embedding_model,
                    vision_model,
                    max_tokens: opts.max_tokens,
                };
                Self::wrap(inner, kind, policy)
            }
            ProviderKind::Openai => {
                let inner = OpenAiClient {
                    client,
                    base_url: opts.openai_base_url.clone(),
                    api_key: opts.openai_api_key.clone(),
                    embedding_model,
                    vision_model,
                    max_tokens: opts.max_tokens,
                };
                Self::wrap(inner, kind, policy)
            }
            ProviderKind::Ollama => {
                let inner = OllamaClient {
                    client,
                    host: opts.ollama_host.clone(),
                    embedding_model,
                    vision_model,
                    max_tokens: opts.max_tokens,
                };
                Self::wrap(inner, kind, policy)
            }
        };
        Ok(providers)
    }

    fn wrap<P>(inner: P, kind: ProviderKind, policy: RetryPolicy) -> Self
    where
        P: EmbeddingProvider + VisionSummarizer + 'static,
    {
        let provider = Arc::new(Retrying::new(inner, kind.name(), policy));
        Self { embedder: provider.clone(), summarizer: provider }
    }
}

/// 创建带超时的 HTTP 客户端
pub fn http_client(timeout: Duration) -> ProviderResult<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .build()?;
    Ok(client)
}

/// 发送请求并解析 JSON 响应，非 2xx 状态码会转换为 `ProviderError::Status`
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &'static str,
    call: &'static str,
    request: RequestBuilder,
) -> ProviderResult<T> {
    let start = Instant::now();
    let result = send_json_inner(request).await;
    metrics::observe_provider_call(provider, call, result.is_ok(), start.elapsed().as_secs_f64());
    result
}

async fn send_json_inner<T: DeserializeOwned>(request: RequestBuilder) -> ProviderResult<T> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() { ProviderError::Timeout } else { ProviderError::Http(e) }
    })?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::Status { status: status.as_u16(), body });
    }
    serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// 拼接 data URL 中使用的 base64 图片
pub(crate) fn encode_image(image: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(image)
}

fn require_key<'a>(key: &'a Option<String>, name: &str) -> ProviderResult<&'a str> {
    match key.as_deref() {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(ProviderError::Config(format!("缺少 {name}"))),
    }
}
