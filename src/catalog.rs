use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use log::{info, warn};
use tokio::sync::{Mutex, RwLock};
use tokio::task::spawn_blocking;

use crate::config::{BuildOptions, DataDir};
use crate::error::{Error, Result};
use crate::gallery::{GalleryIndexer, GalleryStamp};
use crate::persist::{self, RetrieverConfig};
use crate::provider::Providers;
use crate::retriever::{MultiVectorRetriever, RetrieverBuilder};
use crate::utils::validate_collection_name;

/// 图库在集合构建之后发生变化时的处理方式
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalePolicy {
    /// 记录警告，继续使用旧集合
    #[default]
    Warn,
    /// 重新构建集合
    Rebuild,
    /// 不检查
    Ignore,
}

/// 管理数据目录中的集合，以及已加载到内存中的检索器
pub struct Catalog {
    data_dir: DataDir,
    providers: Providers,
    options: BuildOptions,
    resident: RwLock<HashMap<String, Arc<MultiVectorRetriever>>>,
    /// 每个集合一把锁，同名集合的加载与构建依次进行，LMDB 环境不能在同一进程中重复打开
    building: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Catalog {
    pub fn new(data_dir: DataDir, providers: Providers) -> Self {
        Self {
            data_dir,
            providers,
            options: BuildOptions::default(),
            resident: Default::default(),
            building: Default::default(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// 获取集合的检索器
    ///
    /// 依次尝试：内存中已加载的检索器、磁盘上的集合、使用 `gallery` 重新构建。
    /// 没有提供图库且集合不存在时返回 `NotFound`。
    pub async fn get_or_build_retriever(
        &self,
        gallery: Option<&Path>,
        name: &str,
    ) -> Result<Arc<MultiVectorRetriever>> {
        validate_collection_name(name)?;
        if let Some(retriever) = self.cached(name).await {
            return Ok(retriever);
        }

        let lock = self.lock(name).await;
        let _guard = lock.lock().await;
        // 等待期间其他任务可能已经加载完成
        if let Some(retriever) = self.cached(name).await {
            return Ok(retriever);
        }

        if persist::exists(&self.data_dir, name) {
            let (retriever, config) = self.load_from_disk(name).await?;
            if let Some(gallery) = gallery {
                if self.is_stale(gallery, &config)? {
                    match self.options.stale {
                        StalePolicy::Warn => warn!("集合 {} 构建后图库 {} 已发生变化", name, gallery.display()),
                        StalePolicy::Rebuild => {
                            info!("图库 {} 已发生变化，重新构建集合 {}", gallery.display(), name);
                            return self.build(gallery, name).await;
                        }
                        StalePolicy::Ignore => {}
                    }
                }
            }
            return Ok(self.insert(name, retriever).await);
        }

        match gallery {
            Some(gallery) => self.build(gallery, name).await,
            None => Err(Error::NotFound(name.to_owned())),
        }
    }

    /// 从图库重新构建集合并保存，完成后替换内存中的旧检索器
    ///
    /// 构建期间只持有该集合的构建锁，正在进行的查询继续使用旧检索器。
    pub async fn rebuild(&self, gallery: &Path, name: &str) -> Result<Arc<MultiVectorRetriever>> {
        validate_collection_name(name)?;
        let lock = self.lock(name).await;
        let _guard = lock.lock().await;
        self.build(gallery, name).await
    }

    async fn build(&self, gallery: &Path, name: &str) -> Result<Arc<MultiVectorRetriever>> {
        let indexer = GalleryIndexer::new(self.providers.summarizer.clone())
            .suffix(&self.options.suffix)?
            .concurrency(self.options.concurrency);
        let stamp = indexer.fingerprint(gallery)?;
        let data = indexer.extract(gallery).await?;
        if data.is_empty() {
            return Err(Error::InvalidArgument(format!("图库 {} 中没有图片", gallery.display())));
        }

        let (payloads, summaries, texts) = data.into_parts();
        let retriever = RetrieverBuilder::new(self.providers.embedder.clone())
            .backend(self.options.backend)
            .hnsw(self.options.hnsw)
            .concurrency(self.options.concurrency)
            .build(payloads, summaries, texts)
            .await?;
        let retriever = Arc::new(retriever);
        self.save(retriever.clone(), name, Some(stamp)).await?;
        Ok(self.insert(name, retriever).await)
    }

    /// 数据目录中的所有集合
    pub async fn list(&self) -> Result<Vec<String>> {
        let data_dir = self.data_dir.clone();
        join(spawn_blocking(move || persist::list(&data_dir)).await)
    }

    /// 已加载到内存中的集合
    pub async fn resident(&self) -> Vec<String> {
        let mut names = self.resident.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// 删除集合，同时从内存中移除
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let lock = self.lock(name).await;
        let _guard = lock.lock().await;
        self.resident.write().await.remove(name);
        let data_dir = self.data_dir.clone();
        let name = name.to_owned();
        join(spawn_blocking(move || persist::delete(&data_dir, &name)).await)
    }

    async fn cached(&self, name: &str) -> Option<Arc<MultiVectorRetriever>> {
        self.resident.read().await.get(name).cloned()
    }

    async fn lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.building.lock().await.entry(name.to_owned()).or_default().clone()
    }

    async fn load_from_disk(&self, name: &str) -> Result<(MultiVectorRetriever, RetrieverConfig)> {
        let data_dir = self.data_dir.clone();
        let embedder = self.providers.embedder.clone();
        let name = name.to_owned();
        join(spawn_blocking(move || persist::load(&data_dir, &name, embedder)).await)
    }

    async fn save(
        &self,
        retriever: Arc<MultiVectorRetriever>,
        name: &str,
        stamp: Option<GalleryStamp>,
    ) -> Result<RetrieverConfig> {
        let data_dir = self.data_dir.clone();
        let name = name.to_owned();
        join(spawn_blocking(move || persist::save(&data_dir, &retriever, &name, stamp)).await)
    }

    async fn insert(&self, name: &str, retriever: impl Into<Arc<MultiVectorRetriever>>) -> Arc<MultiVectorRetriever> {
        let retriever = retriever.into();
        self.resident.write().await.insert(name.to_owned(), retriever.clone());
        retriever
    }

    fn is_stale(&self, gallery: &Path, config: &RetrieverConfig) -> Result<bool> {
        if self.options.stale == StalePolicy::Ignore {
            return Ok(false);
        }
        let indexer = GalleryIndexer::new(self.providers.summarizer.clone()).suffix(&self.options.suffix)?;
        let stamp = indexer.fingerprint(gallery)?;
        Ok(config.gallery.as_ref() != Some(&stamp))
    }
}

fn join<T>(result: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    result.map_err(|e| Error::Persistence(format!("后台任务失败: {e}")))?
}
