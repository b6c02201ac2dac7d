use anyhow::Result;
use clap::Parser;
use log::info;

use crate::Opts;
use crate::cli::SubCommandExtend;
use crate::persist;

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// 集合名
    #[arg(short, long)]
    pub name: String,
}

impl SubCommandExtend for DeleteCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        persist::delete(&opts.data_dir, &self.name)?;
        info!("已删除集合 {}", self.name);
        Ok(())
    }
}
