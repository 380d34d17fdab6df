mod cli;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tc_av::{PlatformCapabilities, ToolRegistry};
use tc_core::config::Config;
use tc_core::{ListFilter, TaskStatus};
use tc_worker::{shutdown_signal, AppContext, SubmitRequest, TaskService, WorkerPool};
use tokio_util::sync::CancellationToken;

fn main() {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "transcoder=debug,tc_worker=debug,tc_av=debug,tc_queue=debug,tc_db=debug,tc_core=debug"
                .to_string()
        } else {
            "transcoder=info,tc_worker=info,tc_av=info,tc_queue=info,tc_db=info,tc_core=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        let code = e
            .downcast_ref::<tc_core::Error>()
            .map(tc_core::Error::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env_overrides();
    config
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Version => {
            println!("transcoder {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Validate => validate_config(cli.config.as_deref(), &config),
        Commands::CheckTools => check_tools(&config),
        Commands::Profiles { json } => list_profiles(&config, json),
        Commands::Platform => show_platform(&config),
        command => {
            if let Commands::Worker {
                concurrency: Some(n),
            } = command
            {
                config.worker.concurrency = n;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_async(command, config))
        }
    }
}

async fn run_async(command: Commands, config: Config) -> Result<()> {
    let ctx = AppContext::open(config)?;
    let service = TaskService::new(ctx.clone());

    match command {
        Commands::Worker { .. } => run_worker(ctx).await,
        Commands::Submit {
            key,
            bucket,
            output_bucket,
            types,
        } => {
            let task = service
                .submit(SubmitRequest {
                    input_bucket: bucket,
                    input_key: key,
                    output_bucket,
                    transcode_types: types,
                })
                .await?;
            print_json(&task)
        }
        Commands::Status { task_id } => print_json(&service.get(&task_id)?),
        Commands::List {
            status,
            date,
            limit,
            offset,
        } => {
            let filter = ListFilter {
                status: status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
                date,
            };
            print_json(&service.list(&filter, limit, offset)?)
        }
        Commands::Retry { task_id } => print_json(&service.retry(&task_id).await?),
        Commands::Cancel { task_id } => print_json(&service.cancel(&task_id).await?),
        Commands::Abort { task_id } => print_json(&service.abort(&task_id)?),
        Commands::QueueStatus => print_json(&service.queue_status().await?),
        Commands::Purge => {
            let removed = service.purge().await?;
            println!("Purged {removed} message(s)");
            Ok(())
        }
        Commands::TestEncode { input, ext, params } => {
            tokio::fs::create_dir_all(&ctx.config.worker.temp_dir).await?;
            let engine = ctx.engine()?;
            match engine.test_encode(input.as_deref(), &params, &ext).await {
                Ok(report) => {
                    println!("Command: {}", report.command);
                    println!("Duration: {:?}", report.duration);
                    println!("\n{}", report.output);
                    println!("✓ Test encode succeeded");
                    Ok(())
                }
                Err(failure) => {
                    if !failure.command.is_empty() {
                        println!("Command: {}", failure.command);
                    }
                    println!("\n{}", failure.output);
                    Err(tc_core::Error::from(failure).into())
                }
            }
        }
        Commands::Version
        | Commands::Validate
        | Commands::CheckTools
        | Commands::Profiles { .. }
        | Commands::Platform => unreachable!("handled before the runtime starts"),
    }
}

async fn run_worker(ctx: AppContext) -> Result<()> {
    for warning in ctx.config.validate() {
        tracing::warn!("{warning}");
    }
    let engine = ctx.engine()?;
    let pool = WorkerPool::new(ctx, engine);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    pool.run(cancel).await?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_platform(config: &Config) -> Result<()> {
    let tools = ToolRegistry::discover(&config.tools);
    let caps = PlatformCapabilities::detect(&tools, &config.encoding);
    let snapshot = caps.snapshot();
    let platform = snapshot.effective();

    println!("OS: {} ({})", caps.os, caps.arch);
    println!("Platform: {}", caps.platform);
    if let Some(ref gpu) = caps.gpu_name {
        println!("GPU: {gpu}");
    }
    println!("Hardware usable: {}", snapshot.hardware);
    println!("H.264 encoder: {}", platform.encoder(tc_core::VideoCodec::H264));
    println!("H.265 encoder: {}", platform.encoder(tc_core::VideoCodec::H265));
    println!("Hwaccel args: {}", platform.hwaccel_args().join(" "));
    println!("Quality args (q=23): {}", platform.quality_args(23).join(" "));
    println!("Preset args (fast): {}", platform.preset_args("fast").join(" "));
    Ok(())
}

fn list_profiles(config: &Config, json: bool) -> Result<()> {
    let registry = tc_av::ProfileRegistry::with_overrides(&config.profiles);
    if json {
        let profiles: Vec<_> = registry.list().collect();
        return print_json(&profiles);
    }
    for profile in registry.list() {
        println!(
            "{:<22} v{:<3} {:<5} .{:<4} {}",
            profile.name,
            profile.version,
            if profile.is_still() { "still" } else { "video" },
            profile.extension,
            profile.description
        );
    }
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools);
    let mut ffmpeg_ok = false;

    for tool in tools.check_all() {
        let status = if tool.available { "✓" } else { "✗" };
        if tool.name == "ffmpeg" {
            ffmpeg_ok = tool.available;
        }

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if ffmpeg_ok {
        println!("ffmpeg is available.");
    } else {
        println!("ffmpeg is missing; workers cannot encode without it.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>, config: &Config) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)?;
            Config::from_json(&contents)?;
        }
        None => println!("No config file specified, using defaults"),
    }

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        for warning in &warnings {
            println!("⚠ {warning}");
        }
    }
    println!("  Database: {}", config.storage.db_path.display());
    println!("  Blob root: {}", config.storage.blob_root.display());
    println!("  Concurrency: {}", config.worker.concurrency);
    println!("  Hardware acceleration: {}", config.encoding.hw_accel);
    println!("  Extra profiles: {}", config.profiles.len());
    Ok(())
}
