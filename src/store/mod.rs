mod lmdb;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use self::lmdb::{DOCSTORE_DIR, load_docstore, save_docstore};

/// 原始文档，即一张图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// 索引时生成的 UUID
    pub id: String,
    /// 原始文件名，仅用于展示
    pub source: Option<String>,
    pub payload: Vec<u8>,
}

/// 构建检索器时传入的原始内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub source: Option<String>,
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(source: impl Into<String>, data: Vec<u8>) -> Self {
        Self { source: Some(source.into()), data }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self { source: None, data }
    }
}

/// 内存中的文档库，保持插入顺序
#[derive(Debug, Default)]
pub struct InMemoryStore {
    docs: Vec<Arc<Document>>,
    index: HashMap<String, usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入文档，ID 已存在时覆盖旧文档
    pub fn put(&mut self, doc: Document) {
        let doc = Arc::new(doc);
        match self.index.get(&doc.id) {
            Some(&i) => self.docs[i] = doc,
            None => {
                self.index.insert(doc.id.clone(), self.docs.len());
                self.docs.push(doc);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Document>> {
        self.index.get(id).map(|&i| self.docs[i].clone())
    }

    /// 按插入顺序返回所有 ID
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.docs.iter().map(|d| d.id.as_str())
    }

    /// 按插入顺序遍历所有文档
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.docs.iter()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
