// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod runtime;

use anyhow::{Context, Result, anyhow, bail};
use config::Config;
use runtime::{SharedSource, SourceRuntime};
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trapcam_api::ApiClient;
use trapcam_app::{CaptureId, MemorySource, PlaybackSession, Seed, SessionId};
use trapcam_testkit::CaptureFaker;

const DEMO_CAPTURES: usize = 480;
const DEMO_SEED: u64 = 2024;
const DEMO_LATENCY: Duration = Duration::from_millis(180);

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `trapcam --print-example-config` to generate a template",
            options.config_path.display()
        )
    })?;
    init_logging(&config)?;

    let engine = config.engine()?;
    let source: SharedSource = if options.demo {
        let captures = CaptureFaker::new(DEMO_SEED).captures(DEMO_CAPTURES);
        Arc::new(MemorySource::new(captures).with_latency(DEMO_LATENCY))
    } else {
        let client = ApiClient::new(config.api_base_url(), config.api_timeout()?)
            .with_context(|| {
                format!(
                    "invalid [api] config in {}; fix base_url/timeout values",
                    options.config_path.display()
                )
            })?
            .with_token(config.api_token())
            .with_session(options.session);
        if options.check_only {
            let count = client.ping()?;
            println!("{}: {count} captures", client.base_url());
            return Ok(());
        }
        Arc::new(client)
    };
    if options.check_only {
        return Ok(());
    }

    info!(
        demo = options.demo,
        page_size = engine.page_size,
        "starting viewer"
    );
    let mut session = PlaybackSession::new(options.seed, engine);
    let mut runtime = SourceRuntime::new(source);
    trapcam_tui::run_app(&mut session, &mut runtime)
}

/// Logs go to `[log].file` only; without one every event is discarded so
/// nothing writes over the viewer. `TRAPCAM_LOG` overrides `[log].level`.
fn init_logging(config: &Config) -> Result<()> {
    let Some(path) = config.log_file() else {
        return Ok(());
    };

    let filter = match env::var("TRAPCAM_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .context("invalid TRAPCAM_LOG filter directives")?,
        _ => EnvFilter::try_new(config.log_level())
            .with_context(|| format!("invalid [log].level {:?}", config.log_level()))?,
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {} -- check [log].file", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|error| anyhow!("install log subscriber: {error}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    seed: Seed,
    session: Option<SessionId>,
    print_config_path: bool,
    demo: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        seed: Seed::Offset(0),
        session: None,
        print_config_path: false,
        demo: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };
    let mut seed: Option<(&'static str, Seed)> = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--session" => {
                let id = parse_id("--session", iter.next())?;
                options.session = Some(SessionId::new(id));
            }
            flag @ ("--offset" | "--capture") => {
                let next = if flag == "--offset" {
                    let value = iter
                        .next()
                        .ok_or_else(|| anyhow!("--offset requires a number"))?;
                    let offset = value.as_ref().parse::<u64>().with_context(|| {
                        format!("--offset expects a non-negative number, got {:?}", value.as_ref())
                    })?;
                    ("--offset", Seed::Offset(offset))
                } else {
                    let id = parse_id("--capture", iter.next())?;
                    ("--capture", Seed::Capture(CaptureId::new(id)))
                };
                if let Some((previous, _)) = seed {
                    bail!("{previous} and {} cannot be combined; pick one starting point", next.0);
                }
                seed = Some(next);
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--demo" => {
                options.demo = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                bail!("unknown argument {unknown:?}; run with --help to see supported options");
            }
        }
    }

    if let Some((_, value)) = seed {
        options.seed = value;
    }
    Ok(options)
}

fn parse_id<S: AsRef<str>>(flag: &str, value: Option<S>) -> Result<i64> {
    let value = value.ok_or_else(|| anyhow!("{flag} requires an id"))?;
    let id = value
        .as_ref()
        .parse::<i64>()
        .with_context(|| format!("{flag} expects a numeric id, got {:?}", value.as_ref()))?;
    if id <= 0 {
        bail!("{flag} expects a positive id, got {id}");
    }
    Ok(id)
}

fn print_help() {
    println!("trapcam: scrub through a night of camera-trap captures");
    println!("  --config <path>          Use a specific config path");
    println!("  --session <id>           Only show captures from this monitoring session");
    println!("  --offset <n>             Start at the nth capture (default 0)");
    println!("  --capture <id>           Start at a specific capture");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a config template");
    println!("  --demo                   Browse generated captures instead of the API");
    println!("  --check                  Validate config and reach the API, then exit");
    println!("  --help                   Show this help");
}
