use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{CollectionDir, DataDir};
use crate::error::{Error, Result};
use crate::gallery::GalleryStamp;
use crate::index::{IndexDescriptor, SCHEMA_VERSION, open_index};
use crate::provider::EmbeddingProvider;
use crate::retriever::{MultiVectorRetriever, SearchDefaults};
use crate::store::{load_docstore, save_docstore};
use crate::utils::validate_collection_name;

/// 集合配置，保存在 `config.json`，最后写入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    pub version: u32,
    pub name: String,
    pub id_key: String,
    pub search: SearchDefaults,
    /// 构建时使用的嵌入模型，查询时必须使用相同的模型
    pub embedding_model: String,
    pub documents: usize,
    pub entries: usize,
    /// 构建时的图库指纹
    #[serde(default)]
    pub gallery: Option<GalleryStamp>,
}

/// 将检索器保存为集合 `name`，已存在的同名集合会被替换
///
/// 所有文件先写入临时目录，配置文件最后写入，完成后再替换旧目录。
pub fn save(
    data_dir: &DataDir,
    retriever: &MultiVectorRetriever,
    name: &str,
    gallery: Option<GalleryStamp>,
) -> Result<RetrieverConfig> {
    validate_collection_name(name)?;
    fs::create_dir_all(data_dir.path())?;

    let staging = data_dir.staging(name);
    fs::create_dir_all(staging.path())?;
    let config = match write_collection(&staging, retriever, name, gallery) {
        Ok(config) => config,
        Err(e) => {
            if let Err(e) = fs::remove_dir_all(staging.path()) {
                warn!("清理临时目录 {} 失败: {}", staging.path().display(), e);
            }
            return Err(e);
        }
    };

    let target = data_dir.collection(name);
    if target.path().exists() {
        fs::remove_dir_all(target.path())?;
    }
    fs::rename(staging.path(), target.path())?;
    info!("集合 {} 已保存到 {}", name, target.path().display());
    Ok(config)
}

fn write_collection(
    dir: &CollectionDir,
    retriever: &MultiVectorRetriever,
    name: &str,
    gallery: Option<GalleryStamp>,
) -> Result<RetrieverConfig> {
    let descriptor = retriever.index().save(dir.path())?;
    write_json(&dir.index_descriptor(), &descriptor)?;
    save_docstore(retriever.store(), dir.path())?;

    let config = RetrieverConfig {
        version: SCHEMA_VERSION,
        name: name.to_owned(),
        id_key: retriever.id_key().to_owned(),
        search: retriever.search_defaults(),
        embedding_model: retriever.embedder().model().to_owned(),
        documents: retriever.store().len(),
        entries: retriever.index().len(),
        gallery,
    };
    write_json(&dir.config(), &config)?;
    Ok(config)
}

/// 读取集合配置，集合不存在时返回 `NotFound`
pub fn read_config(data_dir: &DataDir, name: &str) -> Result<RetrieverConfig> {
    validate_collection_name(name)?;
    let dir = data_dir.collection(name);
    if !dir.config().is_file() {
        return Err(Error::NotFound(name.to_owned()));
    }
    let config: RetrieverConfig =
        read_json(&dir.config()).map_err(|e| Error::corrupt(name, format!("config.json: {e}")))?;
    if config.version != SCHEMA_VERSION {
        return Err(Error::corrupt(name, format!("不支持的配置版本: {}", config.version)));
    }
    Ok(config)
}

/// 加载集合，重新打开向量索引并重放文档库
pub fn load(
    data_dir: &DataDir,
    name: &str,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<(MultiVectorRetriever, RetrieverConfig)> {
    let config = read_config(data_dir, name)?;
    let dir = data_dir.collection(name);
    if config.embedding_model != embedder.model() {
        warn!(
            "集合 {} 使用 {} 构建，当前嵌入模型为 {}，查询结果可能不准确",
            name,
            config.embedding_model,
            embedder.model()
        );
    }

    let descriptor: IndexDescriptor = read_json(&dir.index_descriptor())
        .map_err(|e| Error::corrupt(name, format!("index.json: {e}")))?;
    let index = open_index(dir.path(), &descriptor)
        .map_err(|e| Error::corrupt(name, format!("向量索引: {e}")))?;
    let store =
        load_docstore(dir.path()).map_err(|e| Error::corrupt(name, format!("文档库: {e}")))?;

    if store.len() != config.documents {
        return Err(Error::corrupt(
            name,
            format!("文档数量不一致: 配置 {}，文档库 {}", config.documents, store.len()),
        ));
    }
    if index.len() != config.entries {
        return Err(Error::corrupt(
            name,
            format!("条目数量不一致: 配置 {}，索引 {}", config.entries, index.len()),
        ));
    }
    debug!("加载集合 {}: {} 个文档, {} 个条目", name, store.len(), index.len());

    let retriever =
        MultiVectorRetriever::from_parts(config.id_key.clone(), store, index, embedder, config.search);
    Ok((retriever, config))
}

/// 集合是否存在
pub fn exists(data_dir: &DataDir, name: &str) -> bool {
    validate_collection_name(name).is_ok() && data_dir.collection(name).config().is_file()
}

/// 列出所有集合，按名称排序
pub fn list(data_dir: &DataDir) -> Result<Vec<String>> {
    if !data_dir.path().is_dir() {
        return Ok(vec![]);
    }
    let mut names = vec![];
    for entry in fs::read_dir(data_dir.path())? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if exists(data_dir, &name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// 删除集合
pub fn delete(data_dir: &DataDir, name: &str) -> Result<()> {
    validate_collection_name(name)?;
    let dir = data_dir.collection(name);
    if !dir.path().is_dir() {
        return Err(Error::NotFound(name.to_owned()));
    }
    fs::remove_dir_all(dir.path())?;
    info!("集合 {} 已删除", name);
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
