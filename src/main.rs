use anyhow::{Context, Result};
use clap::Parser;
use classpath_loader::cache::IndexStats;
use classpath_loader::cli::{Cli, Commands, OutputFormat};
use classpath_loader::config::{resolve_options, LoaderOptions};
use classpath_loader::facade::{LoadedClass, UrlLoader};
use classpath_loader::index::index_file_for;
use classpath_loader::loader::{LoaderKind, open_loader};
use classpath_loader::pool::HandlePool;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_logging();
    let cli = parse_cli()?;
    let options = resolve_options(&cli)?;

    match cli.command.clone() {
        Commands::Find {
            class_name,
            format,
            output,
        } => {
            let class_name = normalize_class_name(&class_name);
            let result = find_class(options, &class_name)?;
            write_find_output(&result, format, output.as_deref())?;
        }
        Commands::Resource { path } => {
            let loader = UrlLoader::from_parts(options, None, None);
            let urls: Vec<String> = loader
                .enumerate_resources(&path)
                .map(|u| u.to_string())
                .collect();
            if urls.is_empty() {
                anyhow::bail!("Resource not found: {path}");
            }
            for url in urls {
                println!("{url}");
            }
        }
        Commands::Index => {
            let output = index_roots(&options)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Stats => {
            let output = collect_stats(options);
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_cli() -> Result<Cli> {
    let args: Vec<String> = std::env::args().collect();
    Ok(Cli::parse_from(rewrite_args_for_implicit_find(args)))
}

fn rewrite_args_for_implicit_find(mut args: Vec<String>) -> Vec<String> {
    if args.len() <= 1 {
        return args;
    }

    let subcommands = ["find", "resource", "index", "stats", "help"];

    let mut idx = 1usize;
    while idx < args.len() {
        let a = args[idx].as_str();
        if a == "--" {
            idx += 1;
            break;
        }

        if a == "--root" || a == "--config" {
            idx += 2;
            continue;
        }

        if a.starts_with('-') {
            idx += 1;
            continue;
        }

        break;
    }

    if idx < args.len() {
        let token = args[idx].as_str();
        if !subcommands.contains(&token) {
            args.insert(idx, "find".to_string());
        }
    }

    args
}

fn normalize_class_name(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("import") {
        s = rest.trim();
    }
    if s.ends_with(';') {
        s = s.trim_end_matches(';').trim();
    }
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn hash_content(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Serialize)]
struct FindResult {
    class_name: String,
    url: String,
    size: usize,
    content_hash: String,
    package: Option<String>,
    roots_realized: usize,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct IndexedRoot {
    root: String,
    kind: LoaderKind,
    class_packages: usize,
    resource_packages: usize,
    persisted: bool,
}

#[derive(Debug, Serialize)]
struct IndexResult {
    indexed: Vec<IndexedRoot>,
    skipped: usize,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct RootStats {
    root: String,
    kind: LoaderKind,
}

#[derive(Debug, Serialize)]
struct StatsResult {
    declared_roots: usize,
    realized_roots: usize,
    indexed: bool,
    index: IndexStats,
    roots: Vec<RootStats>,
    duration_ms: u64,
}

fn find_class(options: LoaderOptions, class_name: &str) -> Result<FindResult> {
    let start = Instant::now();
    let loader = UrlLoader::from_parts(options, None, None);
    let class: Arc<LoadedClass> = loader
        .resolve_class(class_name)
        .with_context(|| format!("Failed to load class {class_name}"))?
        .with_context(|| {
            format!(
                "Class {class_name} not found in {} root(s)",
                loader.urls().len()
            )
        })?;

    Ok(FindResult {
        class_name: class.name.clone(),
        url: class.url.to_string(),
        size: class.bytes.len(),
        content_hash: hash_content(&class.bytes),
        package: class.package.as_ref().map(|p| p.name.clone()),
        roots_realized: loader.class_path().loader_count(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Builds every root's index in parallel. Directory indexes are written
/// next to the classes so later runs can skip the scan.
fn index_roots(options: &LoaderOptions) -> Result<IndexResult> {
    let start = Instant::now();
    let options = LoaderOptions {
        use_persisted_directory_index: true,
        lazy_indexing: false,
        ..options.clone()
    };
    let pool = Arc::new(HandlePool::new(options.max_open_handles));

    let results: Vec<Option<IndexedRoot>> = options
        .urls
        .par_iter()
        .map(|root| index_root(root, &options, &pool))
        .collect::<Result<_>>()?;

    let skipped = results.iter().filter(|r| r.is_none()).count();
    Ok(IndexResult {
        indexed: results.into_iter().flatten().collect(),
        skipped,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

fn index_root(
    root: &Path,
    options: &LoaderOptions,
    pool: &Arc<HandlePool>,
) -> Result<Option<IndexedRoot>> {
    let Some(loader) = open_loader(root, options, pool) else {
        return Ok(None);
    };
    let data = loader
        .build_index()
        .with_context(|| format!("Failed to index {}", root.display()))?;
    let persisted = loader.kind() == LoaderKind::Directory
        && index_file_for(root).exists();

    Ok(Some(IndexedRoot {
        root: root.to_string_lossy().to_string(),
        kind: loader.kind(),
        class_packages: data.class_package_hashes.len(),
        resource_packages: data.resource_package_hashes.len(),
        persisted,
    }))
}

fn collect_stats(options: LoaderOptions) -> StatsResult {
    let start = Instant::now();
    let declared_roots = options.urls.len();
    let indexed = options.indexed();
    let loader = UrlLoader::from_parts(options, None, None);
    let class_path = loader.class_path();
    let realized_roots = class_path.realize_all();

    StatsResult {
        declared_roots,
        realized_roots,
        indexed,
        index: class_path.index_stats(),
        roots: class_path
            .loaders()
            .iter()
            .map(|l| RootStats {
                root: l.root().to_string_lossy().to_string(),
                kind: l.kind(),
            })
            .collect(),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn write_find_output(result: &FindResult, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!("class_name: {}\n", result.class_name));
            out.push_str(&format!("url: {}\n", result.url));
            out.push_str(&format!("size: {}\n", result.size));
            out.push_str(&format!("content_hash: {}\n", result.content_hash));
            out.push_str(&format!("roots_realized: {}\n", result.roots_realized));
            out.push_str(&format!("duration_ms: {}\n", result.duration_ms));
            out
        }
    };

    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write output: {}", path.display()))?;
    } else {
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
