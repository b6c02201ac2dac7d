#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mvsearch::ProviderError;
use mvsearch::gallery::SUMMARY_PROMPT;
use mvsearch::provider::{EmbeddingProvider, ProviderResult, Providers, VisionSummarizer};

pub const DIM: usize = 64;

/// 词袋哈希嵌入：每个单词哈希到一个维度，最后一维为偏置，保证向量非零
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0f32; DIM + 1];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let slot = u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap()) as usize % DIM;
            v[slot] += 1.;
        }
        v[DIM] = 0.1;
        v
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model(&self) -> &str {
        "hash-64"
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }
}

/// 查表嵌入，未知文本返回错误
pub struct TableEmbedder {
    pub table: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new<'a>(items: impl IntoIterator<Item = (&'a str, Vec<f32>)>) -> Self {
        Self { table: items.into_iter().map(|(k, v)| (k.to_owned(), v)).collect() }
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    fn model(&self) -> &str {
        "table"
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.table.get(text).cloned().ok_or_else(|| ProviderError::Malformed(format!("unknown text {text:?}")))
    }
}

/// 二维单位向量，与 [1, 0] 的余弦距离为 `distance`
pub fn at_distance(distance: f32) -> Vec<f32> {
    let cos = 1. - distance;
    vec![cos, (1. - cos * cos).sqrt()]
}

/// 按图片内容查表返回摘要与文字
#[derive(Default)]
pub struct TableSummarizer {
    pub table: HashMap<Vec<u8>, (String, String)>,
    pub failing: HashSet<Vec<u8>>,
    pub calls: AtomicUsize,
}

impl TableSummarizer {
    pub fn with(mut self, image: &[u8], summary: &str, text: &str) -> Self {
        self.table.insert(image.to_vec(), (summary.to_owned(), text.to_owned()));
        self
    }

    pub fn failing(mut self, image: &[u8]) -> Self {
        self.failing.insert(image.to_vec());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionSummarizer for TableSummarizer {
    async fn describe(&self, image: &[u8], prompt: &str) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(image) {
            return Err(ProviderError::Status { status: 400, body: "bad image".into() });
        }
        let (summary, text) = self.table.get(image).cloned().unwrap_or_default();
        Ok(if prompt == SUMMARY_PROMPT { summary } else { text })
    }
}

/// 测试用的一组模型服务
pub fn providers(summarizer: Arc<TableSummarizer>) -> (Providers, Arc<HashEmbedder>) {
    let embedder = Arc::new(HashEmbedder::default());
    (Providers::new(embedder.clone(), summarizer), embedder)
}

/// cat / dog 两张图片的摘要
pub fn pets() -> TableSummarizer {
    TableSummarizer::default()
        .with(b"image-a", "a cat sleeping on a sofa", "cat")
        .with(b"image-b", "a dog running in a park", "dog")
}
