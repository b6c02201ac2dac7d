use std::io;

use thiserror::Error;

/// 检索引擎的错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 构建时图片、摘要、文字三组输入长度不一致
    #[error("输入长度不一致: 图片 {documents}，摘要 {summaries}，文字 {texts}")]
    ArityMismatch { documents: usize, summaries: usize, texts: usize },

    /// 集合不存在（没有配置文件）
    #[error("集合不存在: {0}")]
    NotFound(String),

    /// 索引条目的标签在文档库中找不到，说明两个存储已经不同步
    #[error("索引条目指向不存在的文档: {tag}")]
    Lookup { tag: String },

    /// 嵌入模型或视觉模型调用失败
    #[error("模型调用失败: {0}")]
    Provider(#[from] ProviderError),

    /// 持久化过程中的其他错误
    #[error("持久化失败: {0}")]
    Persistence(String),

    /// 配置文件存在，但其他文件缺失或内容不一致
    #[error("集合 {name} 已损坏: {reason}")]
    CorruptCollection { name: String, reason: String },

    #[error("参数无效: {0}")]
    InvalidArgument(String),

    #[error("向量维度不一致: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("序列化错误: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("LMDB 错误: {0}")]
    Lmdb(#[from] heed::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptCollection { name: name.into(), reason: reason.into() }
    }
}

/// 外部模型服务的错误
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("请求超时")]
    Timeout,

    #[error("服务返回 {status}: {body}")]
    Status { status: u16, body: String },

    #[error("响应格式错误: {0}")]
    Malformed(String),

    #[error("缺少配置: {0}")]
    Config(String),

    /// 瞬时错误重试耗尽
    #[error("重试 {attempts} 次后仍然失败: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ProviderError> },
}

impl ProviderError {
    /// 是否为可以重试的瞬时错误：连接失败、超时、429 以及 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
