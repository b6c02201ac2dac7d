use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::info;
use serde::Serialize;

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::{BuildOptions, Opts};
use crate::retriever::QueryResult;
use crate::utils::{guess_mime, mime_extension};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 查询文本
    pub query: String,
    /// 集合名
    #[arg(short, long)]
    pub name: String,
    /// 集合不存在时，使用该图库构建
    #[arg(short, long)]
    pub gallery: Option<PathBuf>,
    /// 返回的结果数量，默认使用集合保存的值
    #[arg(short, value_name = "K")]
    pub k: Option<usize>,
    /// 将结果图片写入该目录
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
    #[command(flatten)]
    pub build: BuildOptions,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Serialize)]
struct ResultRow<'a> {
    rank: usize,
    score: f32,
    id: &'a str,
    source: Option<&'a str>,
    kind: &'static str,
    matched: &'a str,
    output: Option<PathBuf>,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts, &self.build)?;
        let retriever = catalog.get_or_build_retriever(self.gallery.as_deref(), &self.name).await?;
        let results = match self.k {
            Some(k) => retriever.query(&self.query, k).await?,
            None => retriever.query_default(&self.query).await?,
        };

        let outputs: Vec<Option<PathBuf>> = match &self.output_dir {
            Some(dir) => write_images(dir, &results).await?.into_iter().map(Some).collect(),
            None => vec![None; results.len()],
        };
        print_result(&results, outputs, self.output_format)
    }
}

/// 将结果图片写入目录，文件名为 `result_image_<序号>.<后缀>`
async fn write_images(dir: &Path, results: &[QueryResult]) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;
    let mut paths = Vec::with_capacity(results.len());
    for (i, result) in results.iter().enumerate() {
        let doc = &result.document;
        let ext = doc
            .source
            .as_deref()
            .and_then(|s| Path::new(s).extension())
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| mime_extension(guess_mime(&doc.payload)).to_owned());
        let path = dir.join(format!("result_image_{i}.{ext}"));
        tokio::fs::write(&path, &doc.payload).await?;
        info!("已保存 {}", path.display());
        paths.push(path);
    }
    Ok(paths)
}

fn print_result(results: &[QueryResult], outputs: Vec<Option<PathBuf>>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let rows = results
                .iter()
                .zip(outputs)
                .enumerate()
                .map(|(i, (r, output))| ResultRow {
                    rank: i + 1,
                    score: r.score,
                    id: &r.document.id,
                    source: r.document.source.as_deref(),
                    kind: r.matched.kind.as_str(),
                    matched: &r.matched.text,
                    output,
                })
                .collect::<Vec<_>>();
            println!("{}", serde_json::to_string_pretty(&rows)?)
        }
        OutputFormat::Table => {
            for r in results {
                println!("{:.4}\t{}\t{}", r.score, r.document.source.as_deref().unwrap_or("-"), r.document.id);
            }
        }
    }
    Ok(())
}
