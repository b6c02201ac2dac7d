use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, TryStreamExt, stream};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::index::{EntryKind, HnswParams, IndexBackend, IndexEntry, VectorIndex, new_index};
use crate::metrics;
use crate::provider::EmbeddingProvider;
use crate::store::{Document, InMemoryStore, Payload};
use crate::utils;

pub const DEFAULT_ID_KEY: &str = "doc_id";

/// 空白文本且没有文件名时使用的嵌入内容
const UNTITLED: &str = "untitled";

/// 查询的默认参数，随集合一起保存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDefaults {
    /// 默认返回的文档数量
    pub k: usize,
    /// 向索引请求 k * fetch_factor 个条目，去重后再截断到 k
    pub fetch_factor: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self { k: 4, fetch_factor: 2 }
    }
}

/// 一条查询结果，`score` 为余弦距离，越小越相似
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub document: Arc<Document>,
    pub score: f32,
    /// 命中的索引条目（同一文档的最佳条目）
    pub matched: IndexEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSample {
    pub id: String,
    pub source: Option<String>,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySample {
    pub seq: u64,
    pub tag: String,
    pub kind: EntryKind,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestHit {
    pub id: String,
    pub source: Option<String>,
    pub score: f32,
}

/// 检索器的只读诊断信息
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub id_key: String,
    pub backend: IndexBackend,
    pub embedding_model: String,
    pub dimension: Option<usize>,
    pub documents: usize,
    pub entries: usize,
    pub entries_per_document: f64,
    pub sample_documents: Vec<DocumentSample>,
    pub sample_entries: Vec<EntrySample>,
    /// 使用第一条样本条目的文本做一次检索
    pub test_query: Option<(String, Vec<TestHit>)>,
}

pub struct RetrieverBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    backend: IndexBackend,
    hnsw: HnswParams,
    id_key: String,
    search: SearchDefaults,
    concurrency: usize,
    index: Option<Box<dyn VectorIndex>>,
}

impl RetrieverBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            backend: IndexBackend::default(),
            hnsw: HnswParams::default(),
            id_key: DEFAULT_ID_KEY.into(),
            search: SearchDefaults::default(),
            concurrency: num_cpus::get().min(8),
            index: None,
        }
    }

    pub fn backend(mut self, backend: IndexBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn hnsw(mut self, params: HnswParams) -> Self {
        self.hnsw = params;
        self
    }

    pub fn id_key(mut self, id_key: impl Into<String>) -> Self {
        self.id_key = id_key.into();
        self
    }

    pub fn search(mut self, search: SearchDefaults) -> Self {
        self.search = search;
        self
    }

    /// 同时进行的嵌入请求数量
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 使用一个外部创建的空索引，而不是根据 backend 新建
    pub fn index(mut self, index: Box<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// 构建检索器
    ///
    /// 每个文档会生成两条索引条目：摘要与文字，插入顺序为先全部摘要，再全部文字。
    pub async fn build<P>(
        self,
        documents: Vec<P>,
        summaries: Vec<String>,
        texts: Vec<String>,
    ) -> Result<MultiVectorRetriever>
    where
        P: Into<Payload>,
    {
        if documents.len() != summaries.len() || documents.len() != texts.len() {
            return Err(Error::ArityMismatch {
                documents: documents.len(),
                summaries: summaries.len(),
                texts: texts.len(),
            });
        }
        let mut index = match self.index {
            Some(index) => index,
            None => new_index(self.backend, self.hnsw),
        };
        if !index.is_empty() {
            return Err(Error::InvalidArgument("传入的索引必须为空".into()));
        }

        let mut store = InMemoryStore::new();
        let mut ids = Vec::with_capacity(documents.len());
        for payload in documents.into_iter().map(Into::into) {
            let Payload { source, data } = payload;
            let id = Uuid::new_v4().to_string();
            store.put(Document { id: id.clone(), source, payload: data });
            ids.push(id);
        }

        let pending = summaries
            .into_iter()
            .enumerate()
            .map(|(i, text)| (i, EntryKind::Summary, text))
            .chain(texts.into_iter().enumerate().map(|(i, text)| (i, EntryKind::Text, text)))
            .collect::<Vec<_>>();

        info!("开始计算 {} 个文档的 {} 条嵌入", ids.len(), pending.len());
        let inputs = pending
            .iter()
            .map(|(i, _, text)| embedding_input(text, store.get(&ids[*i]).as_deref()))
            .collect::<Vec<_>>();
        let vectors = stream::iter(inputs)
            .map(|input| {
                let embedder = self.embedder.clone();
                async move { embedder.embed(&input).await }
            })
            .buffered(self.concurrency)
            .try_collect::<Vec<_>>()
            .await?;

        for ((i, kind, text), vector) in pending.into_iter().zip(vectors) {
            index.add(&ids[i], kind, &text, vector)?;
        }
        debug!("索引构建完成: {} 个条目, 维度 {:?}", index.len(), index.dimension());

        Ok(MultiVectorRetriever::from_parts(
            self.id_key,
            store,
            index,
            self.embedder,
            self.search,
        ))
    }
}

/// 空白文本无法嵌入，此时使用文件名代替
fn embedding_input(text: &str, doc: Option<&Document>) -> String {
    if !text.trim().is_empty() {
        return text.to_owned();
    }
    doc.and_then(|d| d.source.clone()).unwrap_or_else(|| UNTITLED.into())
}

/// 多向量检索器：在向量索引中搜索摘要，再通过标签取回原始文档
pub struct MultiVectorRetriever {
    id_key: String,
    store: InMemoryStore,
    index: Box<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    search: SearchDefaults,
}

impl MultiVectorRetriever {
    /// 直接由各部分组装，不检查标签一致性
    pub fn from_parts(
        id_key: String,
        store: InMemoryStore,
        index: Box<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        search: SearchDefaults,
    ) -> Self {
        Self { id_key, store, index, embedder, search }
    }

    pub fn id_key(&self) -> &str {
        &self.id_key
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn search_defaults(&self) -> SearchDefaults {
        self.search
    }

    /// 使用默认的 k 查询
    pub async fn query_default(&self, text: &str) -> Result<Vec<QueryResult>> {
        self.query(text, self.search.k).await
    }

    /// 查询与 `text` 最相似的 k 个文档，按距离升序，距离相同时按插入顺序
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryResult>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k 必须大于 0".into()));
        }
        let start = Instant::now();
        let vector = self.embedder.embed(text).await?;
        let fetch = k.saturating_mul(self.search.fetch_factor.max(1));
        let hits = self.index.search(&vector, fetch)?;

        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(k);
        for hit in hits {
            let entry = self
                .index
                .entry(hit.seq)
                .ok_or_else(|| Error::Persistence(format!("索引返回了不存在的条目: {}", hit.seq)))?;
            // 所有命中都要检查，标签失效时不能静默丢弃
            let document =
                self.store.get(&entry.tag).ok_or_else(|| Error::Lookup { tag: entry.tag.clone() })?;
            if results.len() < k && seen.insert(entry.tag.as_str()) {
                results.push(QueryResult { document, score: hit.distance, matched: entry.clone() });
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        metrics::observe_query_duration(self.index.backend().as_str(), elapsed);
        debug!("查询 {:?} 返回 {} 个结果，用时 {:.3}s", text, results.len(), elapsed);
        Ok(results)
    }

    /// 收集诊断信息，不修改任何状态
    pub fn inspect(&self, samples: usize) -> Diagnostics {
        let documents = self.store.len();
        let entries = self.index.len();
        let sample_documents = self
            .store
            .iter()
            .take(samples)
            .map(|d| DocumentSample { id: d.id.clone(), source: d.source.clone(), size: d.payload.len() })
            .collect();
        let sample_entries = self
            .index
            .entries()
            .iter()
            .take(samples)
            .map(|e| EntrySample {
                seq: e.seq,
                tag: e.tag.clone(),
                kind: e.kind,
                text: utils::truncate(&e.text, 100),
            })
            .collect();
        Diagnostics {
            id_key: self.id_key.clone(),
            backend: self.index.backend(),
            embedding_model: self.embedder.model().to_owned(),
            dimension: self.index.dimension(),
            documents,
            entries,
            entries_per_document: if documents == 0 { 0. } else { entries as f64 / documents as f64 },
            sample_documents,
            sample_entries,
            test_query: None,
        }
    }

    /// 在 `inspect` 的基础上，用第一条非空条目的文本做一次检索
    pub async fn inspect_with_query(&self, samples: usize) -> Result<Diagnostics> {
        let mut diagnostics = self.inspect(samples);
        let probe = self.index.entries().iter().find(|e| !e.text.trim().is_empty());
        if let Some(entry) = probe {
            let hits = self
                .query_default(&entry.text)
                .await?
                .into_iter()
                .map(|r| TestHit {
                    id: r.document.id.clone(),
                    source: r.document.source.clone(),
                    score: r.score,
                })
                .collect();
            diagnostics.test_query = Some((utils::truncate(&entry.text, 100), hits));
        }
        Ok(diagnostics)
    }
}
