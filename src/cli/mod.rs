mod delete;
mod index;
mod inspect;
mod list;
mod search;

pub use delete::*;
pub use index::*;
pub use inspect::*;
pub use list::*;
pub use search::*;

use crate::catalog::Catalog;
use crate::config::{BuildOptions, Opts};
use crate::provider::Providers;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 根据命令行参数创建集合目录
fn open_catalog(opts: &Opts, build: &BuildOptions) -> anyhow::Result<Catalog> {
    let providers = Providers::from_options(&opts.provider)?;
    Ok(Catalog::new(opts.data_dir.clone(), providers).with_options(build.clone()))
}
