//! Deep Research 命令行入口
//!
//! 用法：deep-research [--config <path>] <question...>
//! 最终答案（Markdown）输出到 stdout，研究过程日志输出到 stderr。

use std::path::PathBuf;

use anyhow::{bail, Context};
use deep_research::core::TaskContext;
use deep_research::{load_config, observability, ResearchAgent, ResearchRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut words: Vec<String> = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config requires a path")?;
            config_path = Some(PathBuf::from(path));
        } else {
            words.push(arg);
        }
    }
    let question = words.join(" ");
    if question.trim().is_empty() {
        bail!("usage: deep-research [--config <path>] <question>");
    }

    let cfg = load_config(config_path).context("Failed to load config")?;
    let agent = ResearchAgent::from_config(&cfg);
    let ctx = TaskContext::generate();

    let outcome = agent
        .process_research_task(&ctx, ResearchRequest::question(question))
        .await
        .context("Research task failed")?;

    let answer = outcome
        .result
        .md_answer
        .as_deref()
        .unwrap_or(&outcome.result.answer);
    println!("{}", answer);
    eprintln!(
        "\nvisited: {}  read: {}  known: {}  tokens: {}",
        outcome.visited_urls.len(),
        outcome.read_urls.len(),
        outcome.all_urls.len(),
        outcome.usage.total.total_tokens
    );
    Ok(())
}
