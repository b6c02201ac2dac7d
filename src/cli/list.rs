use anyhow::Result;
use clap::Parser;

use crate::Opts;
use crate::cli::SubCommandExtend;
use crate::persist;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 同时显示文档数量、条目数量与嵌入模型
    #[arg(short, long)]
    pub long: bool,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        for name in persist::list(&opts.data_dir)? {
            if !self.long {
                println!("{}", name);
                continue;
            }
            match persist::read_config(&opts.data_dir, &name) {
                Ok(config) => println!(
                    "{}\t{}\t{}\t{}",
                    name, config.documents, config.entries, config.embedding_model
                ),
                Err(e) => println!("{}\t{}", name, e),
            }
        }
        Ok(())
    }
}
