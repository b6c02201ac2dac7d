use std::path::Path;

use hnsw_rs::prelude::*;
use log::debug;

use super::*;

const BASENAME: &str = "vectors";
/// HNSW 最大层数，hnsw_rs 最多支持 16 层
const MAX_LAYER: usize = 16;
/// 预分配的节点数量，仅影响初始容量
const MAX_ELEMENTS: usize = 100_000;

/// 基于 hnsw_rs 的近似近邻索引，距离为余弦距离
pub struct HnswIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    params: HnswParams,
    entries: Vec<IndexEntry>,
    dimension: Option<usize>,
}

impl HnswIndex {
    pub fn new(params: HnswParams) -> Self {
        Self { hnsw: Self::create(&params), params, entries: vec![], dimension: None }
    }

    fn create(params: &HnswParams) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::new(params.max_nb_connection, MAX_ELEMENTS, MAX_LAYER, params.ef_construction, DistCosine)
    }

    /// 从 `file_dump` 的结果重新打开索引
    ///
    /// 每次加载都会泄漏一个 `HnswIo`（只包含路径与加载选项，图数据本身随索引释放），
    /// 同一个集合应通过 `Catalog` 复用已加载的检索器，而不是反复加载。
    pub fn open(dir: &Path, descriptor: &IndexDescriptor, entries: Vec<IndexEntry>) -> Result<Self> {
        let params = descriptor.hnsw.unwrap_or_default();
        let Some(basename) = &descriptor.vectors else {
            if !entries.is_empty() {
                return Err(Error::Persistence("描述文件缺少 HNSW 数据".into()));
            }
            return Ok(Self::new(params));
        };

        debug!("从 {} 加载 HNSW 索引 {}", dir.display(), basename);
        let reloader = HnswIo::new(dir, basename);
        // NOTE: 加载出的 HNSW 生命周期依赖于 reloader 的引用，所以需要使用 Box::leak 来延长生命周期
        let reloader = Box::leak(Box::new(reloader));
        let hnsw = reloader
            .load_hnsw_with_dist(DistCosine)
            .map_err(|e| Error::Persistence(format!("加载 HNSW 失败: {e}")))?;

        let points = hnsw.get_nb_point();
        if points != entries.len() {
            return Err(Error::Persistence(format!(
                "HNSW 节点数量 {} 与条目数量 {} 不一致",
                points,
                entries.len()
            )));
        }
        Ok(Self { hnsw, params, entries, dimension: descriptor.dimension })
    }
}

impl VectorIndex for HnswIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Hnsw
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    fn add(&mut self, tag: &str, kind: EntryKind, text: &str, vector: Vec<f32>) -> Result<u64> {
        check_dimension(&mut self.dimension, &vector)?;
        let seq = self.entries.len() as u64;
        self.hnsw.insert((vector.as_slice(), seq as usize));
        self.entries.push(IndexEntry { seq, tag: tag.to_owned(), kind, text: text.to_owned() });
        Ok(seq)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        let Some(expected) = self.dimension else {
            return Ok(vec![]);
        };
        if expected != query.len() {
            return Err(Error::DimensionMismatch { expected, actual: query.len() });
        }
        let ef = self.params.ef_search.max(k);
        let mut hits = self
            .hnsw
            .search(query, k, ef)
            .into_iter()
            .map(|n| Hit { seq: n.d_id as u64, distance: n.distance })
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.seq.cmp(&b.seq)));
        Ok(hits)
    }

    fn save(&self, dir: &Path) -> Result<IndexDescriptor> {
        write_entries(&dir.join(ENTRIES_FILE), &self.entries)?;
        let vectors = if self.entries.is_empty() {
            None
        } else {
            // file_dump 会返回实际使用的 basename
            let basename = self
                .hnsw
                .file_dump(dir, BASENAME)
                .map_err(|e| Error::Persistence(format!("保存 HNSW 失败: {e}")))?;
            Some(basename)
        };
        Ok(IndexDescriptor {
            version: SCHEMA_VERSION,
            backend: IndexBackend::Hnsw,
            metric: "cosine".into(),
            dimension: self.dimension,
            entry_count: self.entries.len(),
            vectors,
            entries: ENTRIES_FILE.into(),
            hnsw: Some(self.params),
        })
    }
}
