use std::fs;
use std::path::Path;

use byteorder::BigEndian;
use heed::types::{SerdeBincode, Str, U64};
use heed::{Database, Env, EnvOpenOptions};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{Document, InMemoryStore};
use crate::error::{Error, Result};
use crate::index::SCHEMA_VERSION;

pub const DOCSTORE_DIR: &str = "docstore";

const META_KEY: &str = "meta";
const MIB: usize = 1 << 20;

#[derive(Debug, Serialize, Deserialize)]
struct DocstoreMeta {
    version: u32,
    count: u64,
}

type MetaDb = Database<Str, SerdeBincode<DocstoreMeta>>;
// NOTE: 使用大端序作为 key，LMDB 按字节序遍历时即为插入顺序
type DocsDb = Database<U64<BigEndian>, SerdeBincode<Document>>;

fn open_env(path: &Path, map_size: usize) -> heed::Result<Env> {
    unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(2).open(path) }
}

/// LMDB 的 map_size 必须是页大小的整数倍，这里按 MiB 取整
fn round_map_size(bytes: usize) -> usize {
    bytes.div_ceil(MIB).max(1) * MIB
}

/// 将文档库写入 `dir` 下的 LMDB 环境
pub fn save_docstore(store: &InMemoryStore, dir: &Path) -> Result<()> {
    let path = dir.join(DOCSTORE_DIR);
    fs::create_dir_all(&path)?;

    let payload = store.iter().map(|d| d.payload.len() + d.id.len() + 64).sum::<usize>();
    // 预留 B 树页与元数据的空间
    let map_size = round_map_size(payload * 2 + 16 * MIB);
    debug!("写入文档库: {} 个文档, map_size = {} MiB", store.len(), map_size / MIB);

    let env = open_env(&path, map_size)?;
    let mut txn = env.write_txn()?;
    let db_meta: MetaDb = env.create_database(&mut txn, Some("meta"))?;
    let db_docs: DocsDb = env.create_database(&mut txn, Some("docs"))?;
    db_docs.clear(&mut txn)?;
    for (i, doc) in store.iter().enumerate() {
        db_docs.put(&mut txn, &(i as u64), doc)?;
    }
    let meta = DocstoreMeta { version: SCHEMA_VERSION, count: store.len() as u64 };
    db_meta.put(&mut txn, META_KEY, &meta)?;
    txn.commit()?;

    env.prepare_for_closing().wait();
    Ok(())
}

/// 读取 LMDB 中的文档，按写入顺序重放到内存文档库
pub fn load_docstore(dir: &Path) -> Result<InMemoryStore> {
    let path = dir.join(DOCSTORE_DIR);
    let data = path.join("data.mdb");
    if !data.is_file() {
        return Err(Error::Persistence(format!("文档库不存在: {}", path.display())));
    }
    let map_size = round_map_size(fs::metadata(&data)?.len() as usize + 16 * MIB);

    let env = open_env(&path, map_size)?;
    let store = {
        let txn = env.read_txn()?;
        let db_meta: MetaDb = env
            .open_database(&txn, Some("meta"))?
            .ok_or_else(|| Error::Persistence("文档库缺少 meta 表".into()))?;
        let db_docs: DocsDb = env
            .open_database(&txn, Some("docs"))?
            .ok_or_else(|| Error::Persistence("文档库缺少 docs 表".into()))?;
        let meta = db_meta
            .get(&txn, META_KEY)?
            .ok_or_else(|| Error::Persistence("文档库缺少元数据".into()))?;
        if meta.version != SCHEMA_VERSION {
            return Err(Error::Persistence(format!("不支持的文档库版本: {}", meta.version)));
        }

        let mut store = InMemoryStore::new();
        for item in db_docs.iter(&txn)? {
            let (_, doc) = item?;
            store.put(doc);
        }
        if store.len() as u64 != meta.count {
            return Err(Error::Persistence(format!(
                "文档数量不一致: 元数据 {}，实际 {}",
                meta.count,
                store.len()
            )));
        }
        store
    };
    env.prepare_for_closing().wait();
    debug!("从 {} 加载了 {} 个文档", path.display(), store.len());
    Ok(store)
}
