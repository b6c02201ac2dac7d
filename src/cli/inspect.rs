use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, open_catalog};
use crate::config::Opts;
use crate::retriever::Diagnostics;

#[derive(Parser, Debug, Clone)]
pub struct InspectCommand {
    /// 集合名
    #[arg(short, long)]
    pub name: String,
    /// 显示的样本数量
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub samples: usize,
    /// 使用第一条样本做一次检索，需要调用嵌入模型
    #[arg(long)]
    pub test_query: bool,
    /// 以 JSON 格式输出
    #[arg(long)]
    pub json: bool,
}

impl SubCommandExtend for InspectCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = open_catalog(opts, &Default::default())?;
        let retriever = catalog.get_or_build_retriever(None, &self.name).await?;
        let diagnostics = if self.test_query {
            retriever.inspect_with_query(self.samples).await?
        } else {
            retriever.inspect(self.samples)
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        } else {
            print_diagnostics(&self.name, &diagnostics);
        }
        Ok(())
    }
}

fn print_diagnostics(name: &str, d: &Diagnostics) {
    println!("collection:      {}", name);
    println!("id_key:          {}", d.id_key);
    println!("backend:         {}", d.backend.as_str());
    println!("embedding model: {}", d.embedding_model);
    match d.dimension {
        Some(dim) => println!("dimension:       {}", dim),
        None => println!("dimension:       -"),
    }
    println!("documents:       {}", d.documents);
    println!("entries:         {}", d.entries);
    println!("entries/doc:     {:.2}", d.entries_per_document);

    println!("\nsample documents:");
    for (i, doc) in d.sample_documents.iter().enumerate() {
        println!("  {}. {}\t{}\t{} bytes", i + 1, doc.id, doc.source.as_deref().unwrap_or("-"), doc.size);
    }
    println!("\nsample entries:");
    for entry in &d.sample_entries {
        println!("  #{} [{}] {} -> {}", entry.seq, entry.kind.as_str(), entry.text, entry.tag);
    }
    if let Some((probe, hits)) = &d.test_query {
        println!("\ntest query: {}", probe);
        for hit in hits {
            println!("  {:.4}\t{}\t{}", hit.score, hit.source.as_deref().unwrap_or("-"), hit.id);
        }
    }
}
