mod flat;
mod hnsw;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

pub use self::flat::FlatIndex;
pub use self::hnsw::HnswIndex;
use crate::error::{Error, Result};

/// 持久化格式版本号，格式不兼容时递增
pub const SCHEMA_VERSION: u32 = 1;

/// 索引条目的文本来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// 图片摘要
    Summary,
    /// 图片中的文字
    Text,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Text => "text",
        }
    }
}

/// 向量索引中的一条记录，`tag` 指向文档库中的文档 ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// 插入顺序，同时也是向量在索引中的 ID
    pub seq: u64,
    pub tag: String,
    pub kind: EntryKind,
    pub text: String,
}

/// 一次近邻搜索的命中结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub seq: u64,
    /// 余弦距离，越小越相似
    pub distance: f32,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// HNSW 近似搜索
    #[default]
    Hnsw,
    /// 暴力搜索，适合小图库
    Flat,
}

impl IndexBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hnsw => "hnsw",
            Self::Flat => "flat",
        }
    }
}

/// HNSW 参数
#[derive(Args, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// 每个节点的最大连接数
    #[arg(long = "hnsw-m", value_name = "M", default_value_t = 16)]
    pub max_nb_connection: usize,
    /// 构建时的候选列表大小
    #[arg(long, value_name = "N", default_value_t = 200)]
    pub ef_construction: usize,
    /// 搜索时的候选列表大小，实际使用 max(ef_search, k)
    #[arg(long, value_name = "N", default_value_t = 64)]
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self { max_nb_connection: 16, ef_construction: 200, ef_search: 64 }
    }
}

/// 向量索引的描述文件，记录重新打开索引所需的全部信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub version: u32,
    pub backend: IndexBackend,
    pub metric: String,
    /// 向量维度，空索引为 None
    pub dimension: Option<usize>,
    pub entry_count: usize,
    /// 向量数据文件名（HNSW 为 dump 的 basename），空索引为 None
    pub vectors: Option<String>,
    /// 条目文件名
    pub entries: String,
    #[serde(default)]
    pub hnsw: Option<HnswParams>,
}

pub const ENTRIES_FILE: &str = "entries.bin";

/// 存储标签化文本向量的近邻索引
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> IndexBackend;

    /// 向量维度，未插入任何向量时为 None
    fn dimension(&self) -> Option<usize>;

    /// 所有条目，下标即 `seq`
    fn entries(&self) -> &[IndexEntry];

    /// 插入一条文本向量，返回分配的 `seq`
    fn add(&mut self, tag: &str, kind: EntryKind, text: &str, vector: Vec<f32>) -> Result<u64>;

    /// 搜索最近的 k 个条目，按距离升序返回
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>>;

    /// 将索引写入目录，返回描述文件内容
    fn save(&self, dir: &Path) -> Result<IndexDescriptor>;

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, seq: u64) -> Option<&IndexEntry> {
        self.entries().get(seq as usize)
    }
}

/// 创建一个空索引
pub fn new_index(backend: IndexBackend, params: HnswParams) -> Box<dyn VectorIndex> {
    match backend {
        IndexBackend::Hnsw => Box::new(HnswIndex::new(params)),
        IndexBackend::Flat => Box::new(FlatIndex::new()),
    }
}

/// 根据描述文件重新打开索引
pub fn open_index(dir: &Path, descriptor: &IndexDescriptor) -> Result<Box<dyn VectorIndex>> {
    if descriptor.version != SCHEMA_VERSION {
        return Err(Error::Persistence(format!(
            "不支持的索引格式版本: {}，当前版本 {}",
            descriptor.version, SCHEMA_VERSION
        )));
    }
    let entries = read_entries(&dir.join(&descriptor.entries))?;
    if entries.len() != descriptor.entry_count {
        return Err(Error::Persistence(format!(
            "条目数量不一致: 描述文件 {}，条目文件 {}",
            descriptor.entry_count,
            entries.len()
        )));
    }
    let index: Box<dyn VectorIndex> = match descriptor.backend {
        IndexBackend::Hnsw => Box::new(HnswIndex::open(dir, descriptor, entries)?),
        IndexBackend::Flat => Box::new(FlatIndex::open(dir, descriptor, entries)?),
    };
    Ok(index)
}

#[derive(Serialize, Deserialize)]
struct EntriesFile {
    version: u32,
    entries: Vec<IndexEntry>,
}

pub(crate) fn write_entries(path: &Path, entries: &[IndexEntry]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let file = EntriesFile { version: SCHEMA_VERSION, entries: entries.to_vec() };
    bincode::serialize_into(&mut writer, &file)?;
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_entries(path: &Path) -> Result<Vec<IndexEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let file: EntriesFile = bincode::deserialize_from(reader)?;
    if file.version != SCHEMA_VERSION {
        return Err(Error::Persistence(format!("不支持的条目文件版本: {}", file.version)));
    }
    for (i, entry) in file.entries.iter().enumerate() {
        if entry.seq != i as u64 {
            return Err(Error::Persistence(format!("条目顺序错误: 位置 {} 的 seq 为 {}", i, entry.seq)));
        }
    }
    Ok(file.entries)
}

/// 检查向量维度，首次插入时确定维度
pub(crate) fn check_dimension(dimension: &mut Option<usize>, vector: &[f32]) -> Result<()> {
    match *dimension {
        Some(expected) if expected != vector.len() => {
            Err(Error::DimensionMismatch { expected, actual: vector.len() })
        }
        Some(_) => Ok(()),
        None if vector.is_empty() => Err(Error::InvalidArgument("向量不能为空".into())),
        None => {
            *dimension = Some(vector.len());
            Ok(())
        }
    }
}

/// 余弦距离：1 - cos(a, b)，零向量与任何向量的距离为 1
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0. || nb == 0. {
        return 1.;
    }
    (1. - dot / (na.sqrt() * nb.sqrt())).max(0.)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1., 0.], &[1., 0.]).abs() < 1e-6);
        assert!((cosine_distance(&[1., 0.], &[0., 1.]) - 1.).abs() < 1e-6);
        assert!((cosine_distance(&[1., 0.], &[-1., 0.]) - 2.).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0., 0.], &[1., 0.]), 1.);
    }

    #[test]
    fn test_check_dimension() {
        let mut dim = None;
        check_dimension(&mut dim, &[1., 2.]).unwrap();
        assert_eq!(dim, Some(2));
        check_dimension(&mut dim, &[3., 4.]).unwrap();
        assert!(matches!(
            check_dimension(&mut dim, &[1.]),
            Err(Error::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(check_dimension(&mut None, &[]).is_err());
    }

    #[test]
    fn test_entries_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ENTRIES_FILE);
        let entries = vec![
            IndexEntry { seq: 0, tag: "a".into(), kind: EntryKind::Summary, text: "cat".into() },
            IndexEntry { seq: 1, tag: "a".into(), kind: EntryKind::Text, text: "meow".into() },
        ];
        write_entries(&path, &entries).unwrap();
        assert_eq!(read_entries(&path).unwrap(), entries);
    }

    #[test]
    fn test_entries_out_of_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ENTRIES_FILE);
        let entries =
            vec![IndexEntry { seq: 3, tag: "a".into(), kind: EntryKind::Summary, text: "x".into() }];
        write_entries(&path, &entries).unwrap();
        assert!(matches!(read_entries(&path), Err(Error::Persistence(_))));
    }
}
