use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::cli::{Cli, Commands, ScanArgs};
use asset_hunter::config::ScanConfig;
use asset_hunter::modules::{self, ModuleOptions, OUTPUT_MODULES, SCAN_MODULES};
use asset_hunter::scan::{Scan, ScanStatus};

fn print_ascii_logo() {
    println!(r#"
     _                 _     _   _             _
    / \   ___ ___  ___| |_  | | | |_   _ _ __ | |_ ___ _ __
   / _ \ / __/ __|/ _ \ __| | |_| | | | | '_ \| __/ _ \ '__|
  / ___ \\__ \__ \  __/ |_  |  _  | |_| | | | | ||  __/ |
 /_/   \_\___/___/\___|\__| |_| |_|\__,_|_| |_|\__\___|_|

                  Recursive Asset Discovery v{}
    "#, env!("CARGO_PKG_VERSION"));
}

pub async fn run_from_cli(cli: Cli) -> anyhow::Result<()> {
    // Our crate follows the global flags; resolver and HTTP internals stay quiet.
    use tracing_subscriber::EnvFilter;
    let crate_level = if cli.debug { "debug" } else if cli.verbose { "info" } else { "warn" };
    let filter_str = format!(
        "asset_hunter={crate},hickory_resolver=warn,hickory_proto=warn,reqwest=info,hyper=info,h2=info",
        crate = crate_level
    );
    let env_filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new(crate_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Modules => {
            println!("Scan modules:   {}", SCAN_MODULES.join(", "));
            println!("Output modules: {}", OUTPUT_MODULES.join(", "));
            Ok(())
        }
        Commands::Scan(args) => run_scan(args).await,
    }
}

/// Expand entries naming a readable file into that file's lines.
fn expand_entries(entries: &[String]) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in entries {
        let path = Path::new(entry);
        if path.is_file() {
            let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            out.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(String::from),
            );
        } else {
            out.push(entry.clone());
        }
    }
    Ok(out)
}

fn build_config(args: &ScanArgs) -> anyhow::Result<ScanConfig> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::from_file(Path::new(path))?,
        None => ScanConfig::default(),
    };
    if args.no_dns {
        config.dns_resolution = false;
    }
    if let Some(d) = args.search_distance {
        config.scope_search_distance = d;
    }
    if let Some(d) = args.report_distance {
        config.scope_report_distance = d;
    }
    if let Some(d) = args.dns_distance {
        config.dns_search_distance = d;
    }
    config.validate()?;
    Ok(config)
}

async fn run_scan(args: ScanArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let targets = expand_entries(&args.targets)?;
    if targets.is_empty() {
        anyhow::bail!("no targets given");
    }
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| format!("scan_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S")));
    let out_dir = PathBuf::from(args.out.clone().unwrap_or_else(|| format!("./results/{}", name)));
    let options = ModuleOptions {
        output_dir: Some(out_dir),
    };

    let mut builder = Scan::builder(&name)
        .config(config)
        .targets(targets.iter().cloned())
        .blacklist(expand_entries(&args.blacklist)?);
    if !args.whitelist.is_empty() {
        builder = builder.whitelist(expand_entries(&args.whitelist)?);
    }
    for module_name in args.modules.iter().chain(args.output_modules.iter()) {
        builder = builder.module(modules::load_module(module_name, &options)?);
    }
    let scan = builder.build()?;

    tracing::info!(scan=%name, targets=targets.len(), modules=scan.modules().len(), "Starting scan");
    print_ascii_logo();
    eprintln!("[>] Targets: {}", targets.join(", "));
    eprintln!(
        "[~] Modules: {}",
        scan.modules().iter().map(|m| m.name().to_string()).collect::<Vec<_>>().join(", ")
    );
    eprintln!("\n{}\n", "-".repeat(60));

    let interrupt = {
        let scan = Arc::clone(&scan);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[!] Interrupted, stopping scan...");
                scan.stop();
            }
        })
    };

    let status = scan.run().await?;
    interrupt.abort();
    log_summary(&scan);

    match status {
        ScanStatus::Finished => Ok(()),
        other => anyhow::bail!("scan ended with status {}", other),
    }
}

fn log_summary(scan: &Scan) {
    let stats = scan.stats();
    eprintln!(
        "[*] {} events emitted, {} reported",
        stats.emitted_total(),
        stats.produced_total()
    );
    for (module, produced, emitted) in stats.module_summary() {
        tracing::info!("{}: produced {} / emitted {}", module, produced, emitted);
    }
    for (name, call) in stats.slowest_calls(5) {
        tracing::debug!("{}: {} calls, {:.2?} total", name, call.calls, call.total);
    }
    let words = scan.word_cloud().top(10);
    if !words.is_empty() {
        tracing::info!(
            "Top words: {}",
            words.iter().map(|(w, n)| format!("{} ({})", w, n)).collect::<Vec<_>>().join(", ")
        );
    }
}
