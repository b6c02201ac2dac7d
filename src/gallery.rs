use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use futures::{StreamExt, TryStreamExt, stream};
use indicatif::ProgressBar;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::metrics;
use crate::provider::VisionSummarizer;
use crate::store::Payload;
use crate::utils::pb_style;

/// 生成用于检索的图片摘要
pub const SUMMARY_PROMPT: &str = "Describe this image so that it can be found later by a text search. \
Write a short, dense summary that names the main subjects, the setting, notable colours and objects, \
and any visible actions. Do not speculate about things you cannot see.";

/// 逐字提取图片中的文字
pub const TEXT_PROMPT: &str = "Transcribe every piece of text that appears in this image, exactly as written, \
including signs, labels, captions and handwriting. Output only the transcribed text. \
If the image contains no text, reply with a one-line description of the image instead.";

pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png,webp";

/// 图库的指纹，用于判断集合是否过期
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryStamp {
    pub files: usize,
    /// blake3 摘要，十六进制
    pub digest: String,
}

/// 图库提取结果，四个数组一一对应，按文件名排序
#[derive(Debug, Clone, Default)]
pub struct GalleryData {
    pub sources: Vec<String>,
    pub images: Vec<Vec<u8>>,
    pub summaries: Vec<String>,
    pub texts: Vec<String>,
}

impl GalleryData {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// 拆分为构建检索器所需的三组输入
    pub fn into_parts(self) -> (Vec<Payload>, Vec<String>, Vec<String>) {
        let payloads =
            self.sources.into_iter().zip(self.images).map(|(s, data)| Payload::new(s, data)).collect();
        (payloads, self.summaries, self.texts)
    }
}

/// 扫描图库目录，调用视觉模型为每张图片生成摘要和文字
pub struct GalleryIndexer {
    summarizer: Arc<dyn VisionSummarizer>,
    suffix: Regex,
    concurrency: usize,
}

impl GalleryIndexer {
    pub fn new(summarizer: Arc<dyn VisionSummarizer>) -> Self {
        Self { summarizer, suffix: suffix_regex(DEFAULT_SUFFIX), concurrency: num_cpus::get().min(8) }
    }

    /// 设置扫描的文件后缀名，多个后缀用逗号分隔
    pub fn suffix(mut self, suffix: &str) -> Result<Self> {
        if suffix.split(',').all(|s| s.trim().is_empty()) {
            return Err(Error::InvalidArgument(format!("无效的后缀名: {suffix:?}")));
        }
        self.suffix = suffix_regex(suffix);
        Ok(self)
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 列出目录第一层中后缀匹配的文件，按文件名排序
    pub fn scan(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Error::InvalidArgument(format!("图库目录不存在: {}", dir.display())));
        }
        let mut paths = vec![];
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if path.extension().map(|s| self.suffix.is_match(&s.to_string_lossy())) == Some(true) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// 提取图库中所有图片的摘要与文字
    ///
    /// 模型调用失败或返回空文本时，该字段为空字符串，不会中断整个流程；读取文件失败则直接返回错误。
    pub async fn extract(&self, dir: &Path) -> Result<GalleryData> {
        let paths = self.scan(dir)?;
        info!("在 {} 中找到 {} 张图片", dir.display(), paths.len());

        let pb = ProgressBar::new(paths.len() as u64).with_style(pb_style());
        let items = stream::iter(paths)
            .map(|path: PathBuf| {
                let pb = pb.clone();
                async move {
                    let data = tokio::fs::read(&path).await?;
                    let name = file_name(&path);
                    pb.set_message(name.clone());
                    let (summary, text) = tokio::join!(
                        self.describe(&data, SUMMARY_PROMPT, "summary", &name),
                        self.describe(&data, TEXT_PROMPT, "text", &name),
                    );
                    pb.inc(1);
                    Ok::<_, Error>((name, data, summary, text))
                }
            })
            .buffered(self.concurrency)
            .try_collect::<Vec<_>>()
            .await;
        pb.finish_and_clear();

        let mut gallery = GalleryData::default();
        for (name, data, summary, text) in items? {
            gallery.sources.push(name);
            gallery.images.push(data);
            gallery.summaries.push(summary);
            gallery.texts.push(text);
        }
        Ok(gallery)
    }

    async fn describe(&self, image: &[u8], prompt: &str, field: &str, name: &str) -> String {
        match self.summarizer.describe(image, prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_owned(),
            Ok(_) => {
                warn!("{name} 的 {field} 为空");
                metrics::inc_summary_degraded(field);
                String::new()
            }
            Err(e) => {
                warn!("{name} 的 {field} 生成失败: {e}");
                metrics::inc_summary_degraded(field);
                String::new()
            }
        }
    }

    /// 计算图库指纹：按文件名排序后，对 (文件名, 大小, 修改时间) 做哈希
    pub fn fingerprint(&self, dir: &Path) -> Result<GalleryStamp> {
        let paths = self.scan(dir)?;
        let mut hasher = blake3::Hasher::new();
        for path in &paths {
            let meta = path.metadata()?;
            let mtime = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            hasher.update(file_name(path).as_bytes());
            hasher.update(&[0]);
            hasher.update(&meta.len().to_le_bytes());
            hasher.update(&mtime.to_le_bytes());
        }
        Ok(GalleryStamp { files: paths.len(), digest: hasher.finalize().to_hex().to_string() })
    }
}

fn suffix_regex(suffix: &str) -> Regex {
    let alternatives = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(s.trim_start_matches('.')))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({alternatives})$")).expect("failed to build regex")
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("jpg,png", "JPG", true)]
    #[case("jpg,png", "png", true)]
    #[case("jpg,png", "jpeg", false)]
    #[case(".webp", "webp", true)]
    #[case("jpg", "xjpg", false)]
    fn test_suffix_regex(#[case] suffix: &str, #[case] ext: &str, #[case] matched: bool) {
        assert_eq!(suffix_regex(suffix).is_match(ext), matched);
    }

    #[test]
    fn test_into_parts() {
        let data = GalleryData {
            sources: vec!["a.jpg".into()],
            images: vec![b"a".to_vec()],
            summaries: vec!["cat".into()],
            texts: vec![String::new()],
        };
        let (payloads, summaries, texts) = data.into_parts();
        assert_eq!(payloads, vec![Payload::new("a.jpg", b"a".to_vec())]);
        assert_eq!(summaries, vec!["cat"]);
        assert_eq!(texts, vec![""]);
    }
}
