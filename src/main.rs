use anyhow::{bail, Result};
use clap::Parser;
use colored::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use site_mirror::downloader::read_batch_file;
use site_mirror::{MirrorCommand, RunReport, WebsiteMirror};

#[tokio::main]
async fn main() -> Result<()> {
    let args = MirrorCommand::parse();

    let default_filter = match args.verbose {
        0 => "site_mirror=warn",
        1 => "site_mirror=info",
        2 => "site_mirror=debug",
        _ => "site_mirror=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = args.to_config()?;

    let report = match &args.batch {
        Some(path) => {
            let urls = read_batch_file(path)?;
            if config.start_url.trim().is_empty() {
                match urls.first() {
                    Some(first) => config.start_url = first.clone(),
                    None => bail!("batch file {:?} lists no URLs", path),
                }
            }
            println!("📥 Downloading {} URLs into {:?}", urls.len(), config.output_dir);
            WebsiteMirror::new(config)?.download_batch(&urls).await?
        }
        None => {
            println!("🚀 Starting website mirroring for: {}", config.start_url.blue());
            println!("📁 Output directory: {:?}", config.output_dir);
            println!("🔗 Max pages: {}", config.max_pages);
            println!("⚡ Concurrent asset downloads: {}", config.workers);
            WebsiteMirror::new(config)?.mirror_website().await?
        }
    };

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!(
        "📊 Pages visited: {} ({} of them linked files)",
        report.pages_visited.to_string().bold(),
        report.linked_files
    );
    println!(
        "📦 Assets downloaded: {} (reused {}, resumed from disk {})",
        report.assets_downloaded.to_string().bold(),
        report.assets_reused,
        report.resumed
    );
    println!("⏭️  Out of scope references: {}", report.out_of_scope);

    if report.failures() > 0 {
        println!(
            "{}",
            format!(
                "⚠️  {} pages and {} assets could not be mirrored",
                report.pages_failed, report.assets_failed
            )
            .yellow()
        );
    }
    println!("{}", "✅ Website mirroring completed successfully!".green());
}
