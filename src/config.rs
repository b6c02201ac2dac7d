use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use uuid::Uuid;

use crate::catalog::StalePolicy;
use crate::cli::*;
use crate::index::{HnswParams, IndexBackend};
use crate::provider::ProviderKind;

static DATA_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "mvsearch", "mvsearch")
        .map(|dirs| dirs.data_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| "./mvsearch-data".into())
});

fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, 8)
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mvsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，每个集合保存在其中的一个子目录
    #[arg(short, long, global = true, default_value = DATA_DIR.as_str())]
    pub data_dir: DataDir,
    #[command(flatten)]
    pub provider: ProviderOptions,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从图库目录构建集合
    Index(IndexCommand),
    /// 使用自然语言搜索图片
    Search(SearchCommand),
    /// 查看集合的诊断信息
    Inspect(InspectCommand),
    /// 列出所有集合
    List(ListCommand),
    /// 删除集合
    Delete(DeleteCommand),
}

/// 模型服务配置
#[derive(Args, Debug, Clone)]
pub struct ProviderOptions {
    /// 模型服务后端
    #[arg(long, global = true, value_enum, default_value_t = ProviderKind::Gemini)]
    pub provider: ProviderKind,
    /// 嵌入模型，默认根据后端选择
    #[arg(long, global = true, value_name = "MODEL")]
    pub embedding_model: Option<String>,
    /// 视觉模型，默认根据后端选择
    #[arg(long, global = true, value_name = "MODEL")]
    pub vision_model: Option<String>,
    #[arg(long, global = true, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    #[arg(long, global = true, value_name = "URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,
    #[arg(
        long,
        global = true,
        value_name = "URL",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub gemini_base_url: String,
    #[arg(long, global = true, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub ollama_host: String,
    /// 单次请求超时时间（秒）
    #[arg(long, global = true, value_name = "SECS", default_value_t = 60)]
    pub request_timeout: u64,
    /// 瞬时错误的最大重试次数
    #[arg(long, global = true, value_name = "N", default_value_t = 3)]
    pub max_retries: u32,
    /// 视觉模型单次回复的最大 token 数
    #[arg(long, global = true, value_name = "N", default_value_t = 1024)]
    pub max_tokens: u32,
}

/// 构建集合时使用的参数
#[derive(Args, Debug, Clone)]
pub struct BuildOptions {
    /// 向量索引类型
    #[arg(long, value_enum, default_value_t = IndexBackend::Hnsw)]
    pub backend: IndexBackend,
    #[command(flatten)]
    pub hnsw: HnswParams,
    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    /// 同时处理的图片数量
    #[arg(short = 'j', long, value_name = "N", default_value_t = default_concurrency())]
    pub concurrency: usize,
    /// 图库在集合构建后发生变化时的处理方式
    #[arg(long, value_enum, default_value_t = StalePolicy::Warn)]
    pub stale: StalePolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            hnsw: HnswParams::default(),
            suffix: "jpg,jpeg,png,webp".into(),
            concurrency: default_concurrency(),
            stale: StalePolicy::default(),
        }
    }
}

/// 数据目录
#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回集合所在目录
    pub fn collection(&self, name: &str) -> CollectionDir {
        CollectionDir { path: self.path.join(name) }
    }

    /// 返回一个新的临时目录，保存完成后再重命名为集合目录
    pub fn staging(&self, name: &str) -> CollectionDir {
        CollectionDir { path: self.path.join(format!(".{}.tmp-{}", name, Uuid::new_v4())) }
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// 单个集合的目录
#[derive(Debug, Clone)]
pub struct CollectionDir {
    path: PathBuf,
}

impl CollectionDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回检索器配置文件的路径，该文件存在即表示集合存在
    pub fn config(&self) -> PathBuf {
        self.path.join("config.json")
    }

    /// 返回向量索引描述文件的路径
    pub fn index_descriptor(&self) -> PathBuf {
        self.path.join("index.json")
    }

    pub fn entries(&self) -> PathBuf {
        self.path.join(crate::index::ENTRIES_FILE)
    }

    /// 返回文档库 LMDB 环境的路径
    pub fn docstore(&self) -> PathBuf {
        self.path.join(crate::store::DOCSTORE_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_paths() {
        let dir = DataDir::new("/data");
        let collection = dir.collection("photos");
        assert_eq!(collection.path(), Path::new("/data/photos"));
        assert_eq!(collection.config(), Path::new("/data/photos/config.json"));
        assert_eq!(collection.index_descriptor(), Path::new("/data/photos/index.json"));
        assert_eq!(collection.docstore(), Path::new("/data/photos/docstore"));

        let staging = dir.staging("photos");
        let name = staging.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".photos.tmp-"));
        assert_ne!(staging.path(), dir.staging("photos").path());
    }

    #[test]
    fn test_parse_opts() {
        let opts = Opts::parse_from([
            "mvsearch",
            "search",
            "a red car",
            "-n",
            "photos",
            "-k",
            "3",
            "--provider",
            "ollama",
            "--data-dir",
            "/tmp/mv",
        ]);
        assert_eq!(opts.data_dir.path(), Path::new("/tmp/mv"));
        assert_eq!(opts.provider.provider, ProviderKind::Ollama);
        let SubCommand::Search(cmd) = opts.subcmd else { panic!("expected search") };
        assert_eq!(cmd.query, "a red car");
        assert_eq!(cmd.k, Some(3));
        assert_eq!(cmd.build.backend, IndexBackend::Hnsw);
    }
}
