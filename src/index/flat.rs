use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::*;

const VECTORS_FILE: &str = "vectors.flat";

/// 暴力搜索索引，结果是精确的
#[derive(Default)]
pub struct FlatIndex {
    entries: Vec<IndexEntry>,
    vectors: Vec<Vec<f32>>,
    dimension: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct FlatVectors {
    version: u32,
    dimension: Option<usize>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(dir: &Path, descriptor: &IndexDescriptor, entries: Vec<IndexEntry>) -> Result<Self> {
        let Some(name) = &descriptor.vectors else {
            if !entries.is_empty() {
                return Err(Error::Persistence("描述文件缺少向量文件".into()));
            }
            return Ok(Self::new());
        };
        let reader = BufReader::new(File::open(dir.join(name))?);
        let data: FlatVectors = bincode::deserialize_from(reader)?;
        if data.version != SCHEMA_VERSION {
            return Err(Error::Persistence(format!("不支持的向量文件版本: {}", data.version)));
        }
        if data.vectors.len() != entries.len() || data.dimension != descriptor.dimension {
            return Err(Error::Persistence(format!(
                "向量文件与描述文件不一致: 向量 {}，条目 {}",
                data.vectors.len(),
                entries.len()
            )));
        }
        Ok(Self { entries, vectors: data.vectors, dimension: data.dimension })
    }
}

impl VectorIndex for FlatIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Flat
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
        self.entries.push(IndexEntry { seq, tag: tag.to_owned(), kind, text: text.to_owned() });
        self.vectors.push(vector);
        Ok(seq)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if let Some(expected) = self.dimension {
            if expected != query.len() {
                return Err(Error::DimensionMismatch { expected, actual: query.len() });
            }
        }
        let mut hits = self
            .vectors
            .par_iter()
            .enumerate()
            .map(|(i, v)| Hit { seq: i as u64, distance: cosine_distance(query, v) })
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.seq.cmp(&b.seq)));
        hits.truncate(k);
        Ok(hits)
    }

    fn save(&self, dir: &Path) -> Result<IndexDescriptor> {
        write_entries(&dir.join(ENTRIES_FILE), &self.entries)?;
        let vectors = if self.vectors.is_empty() {
            None
        } else {
            let mut writer = BufWriter::new(File::create(dir.join(VECTORS_FILE))?);
            let data = FlatVectors {
                version: SCHEMA_VERSION,
                dimension: self.dimension,
                vectors: self.vectors.clone(),
            };
            bincode::serialize_into(&mut writer, &data)?;
            writer.flush()?;
            Some(VECTORS_FILE.to_owned())
        };
        Ok(IndexDescriptor {
            version: SCHEMA_VERSION,
            backend: IndexBackend::Flat,
            metric: "cosine".into(),
            dimension: self.dimension,
            entry_count: self.entries.len(),
            vectors,
            entries: ENTRIES_FILE.into(),
            hnsw: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample() -> FlatIndex {
        let mut index = FlatIndex::new();
        index.add("a", EntryKind::Summary, "x", vec![1., 0., 0.]).unwrap();
        index.add("b", EntryKind::Summary, "y", vec![0., 1., 0.]).unwrap();
        index.add("c", EntryKind::Text, "xy", vec![1., 1., 0.]).unwrap();
        index.add("d", EntryKind::Text, "x again", vec![2., 0., 0.]).unwrap();
        index
    }

    #[test]
    fn test_search_order_and_ties() {
        let index = sample();
        let hits = index.search(&[1., 0., 0.], 3).unwrap();
        // seq 0 与 seq 3 方向相同，距离相等时按插入顺序
        assert_eq!(hits.iter().map(|h| h.seq).collect::<Vec<_>>(), vec![0, 3, 2]);
        assert!(hits[0].distance <= hits[2].distance);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = sample();
        assert!(matches!(
            index.add("e", EntryKind::Text, "z", vec![1.]),
            Err(Error::DimensionMismatch { expected: 3, actual: 1 })
        ));
        assert!(index.search(&[1., 0.], 1).is_err());
    }

    #[test]
    fn test_save_open() {
        let dir = tempdir().unwrap();
        let index = sample();
        let descriptor = index.save(dir.path()).unwrap();
        assert_eq!(descriptor.entry_count, 4);
        assert_eq!(descriptor.dimension, Some(3));

        let reopened = open_index(dir.path(), &descriptor).unwrap();
        assert_eq!(reopened.backend(), IndexBackend::Flat);
        assert_eq!(reopened.entries(), index.entries());
        assert_eq!(reopened.search(&[0., 1., 0.], 1).unwrap()[0].seq, 1);
    }

    #[test]
    fn test_empty_save_open() {
        let dir = tempdir().unwrap();
        let descriptor = FlatIndex::new().save(dir.path()).unwrap();
        assert_eq!(descriptor.vectors, None);
        let reopened = open_index(dir.path(), &descriptor).unwrap();
        assert!(reopened.is_empty());
        assert!(reopened.search(&[1.], 3).unwrap().is_empty());
    }
}
