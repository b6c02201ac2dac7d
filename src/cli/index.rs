use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::spawn_blocking;

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::{BuildOptions, Opts};
use crate::metrics;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    /// 图库目录，只扫描第一层
    pub gallery: PathBuf,
    /// 集合名
    #[arg(short, long)]
    pub name: String,
    /// 即使集合已存在也重新构建
    #[arg(long)]
    pub rebuild: bool,
    #[command(flatten)]
    pub build: BuildOptions,
    /// 完成后将指标推送到该 Pushgateway 地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 推送指标时使用的 job 名称
    #[arg(long, value_name = "JOB", default_value = "mvsearch")]
    pub prometheus_job: String,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts, &self.build)?;
        let retriever = if self.rebuild {
            catalog.rebuild(&self.gallery, &self.name).await?
        } else {
            catalog.get_or_build_retriever(Some(&self.gallery), &self.name).await?
        };
        info!(
            "集合 {}: {} 个文档，{} 个条目",
            self.name,
            retriever.store().len(),
            retriever.index().len()
        );
        println!("{}\t{}\t{}", self.name, retriever.store().len(), retriever.index().len());

        if let Some(url) = self.prometheus_push.clone() {
            let job = self.prometheus_job.clone();
            let instance = self.name.clone();
            // prometheus 的推送使用阻塞式 HTTP 客户端
            spawn_blocking(move || metrics::push(&job, &instance, &url)).await??;
            info!("指标已推送");
        }
        Ok(())
    }
}
