//! plaza-sim entry point — CLI wiring and config-driven episode runs.

use std::path::Path;
use std::process;

use plaza_sim::config::PlazaConfig;
use plaza_sim::data::TimeSeriesBundle;
use plaza_sim::env::PlazaEnv;
use plaza_sim::io::export::{EpisodeSummary, export_summary, export_timeseries};
use plaza_sim::io::loader::load_bundle;
use plaza_sim::runner::{Policy, run_episode};

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    preset: Option<String>,
    policy: String,
    seed: u64,
    synthetic: bool,
    summary_out: Option<String>,
    timeseries_out: Option<String>,
}

fn print_help() {
    eprintln!("plaza-sim — PV + BESS EV charging plaza dispatch simulator");
    eprintln!();
    eprintln!("Usage: plaza-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load configuration from TOML file");
    eprintln!("  --preset <name>          Use a built-in preset (baseline, grid-charging)");
    eprintln!("  --policy <id>            baseline | bess-off | path to an action-trace CSV");
    eprintln!("  --seed <u64>             Episode seed recorded in the summary");
    eprintln!("  --synthetic              Use a seeded synthetic year instead of data files");
    eprintln!("  --summary-out <path>     Write the episode summary JSON");
    eprintln!("  --timeseries-out <path>  Write the per-step telemetry CSV");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the baseline preset is used.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        preset: None,
        policy: "baseline".to_string(),
        seed: 0,
        synthetic: false,
        summary_out: None,
        timeseries_out: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    process::exit(1);
                }
                cli.config_path = Some(args[i].clone());
            }
            "--preset" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --preset requires a name argument");
                    process::exit(1);
                }
                cli.preset = Some(args[i].clone());
            }
            "--policy" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --policy requires an identifier argument");
                    process::exit(1);
                }
                cli.policy = args[i].clone();
            }
            "--seed" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --seed requires a u64 argument");
                    process::exit(1);
                }
                if let Ok(s) = args[i].parse::<u64>() {
                    cli.seed = s;
                } else {
                    eprintln!("error: --seed value \"{}\" is not a valid u64", args[i]);
                    process::exit(1);
                }
            }
            "--synthetic" => {
                cli.synthetic = true;
            }
            "--summary-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --summary-out requires a path argument");
                    process::exit(1);
                }
                cli.summary_out = Some(args[i].clone());
            }
            "--timeseries-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --timeseries-out requires a path argument");
                    process::exit(1);
                }
                cli.timeseries_out = Some(args[i].clone());
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();

    // Load config: --config takes priority, then --preset, then baseline.
    let config = if let Some(ref path) = cli.config_path {
        match PlazaConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match PlazaConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        PlazaConfig::baseline()
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    // Input data: real files unless a synthetic year was requested.
    let bundle = if cli.synthetic {
        TimeSeriesBundle::synthetic(cli.seed)
    } else {
        match load_bundle(&config) {
            Ok(bundle) => bundle,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    };

    let policy = match Policy::resolve(&cli.policy) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let mut env = match PlazaEnv::new(bundle, &config) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let output = match run_episode(&mut env, &policy, cli.seed) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    println!("{}", output.kpi);

    if let Some(ref path) = cli.summary_out {
        let summary = EpisodeSummary {
            policy: policy.name().to_string(),
            seed: cli.seed,
            weights: config.reward.weights,
            kpi: output.kpi.clone(),
            metrics: output.metrics.clone(),
        };
        if let Err(e) = export_summary(&summary, Path::new(path)) {
            eprintln!("error: failed to write summary: {e}");
            process::exit(1);
        }
        eprintln!("Summary written to {path}");
    }

    if let Some(ref path) = cli.timeseries_out {
        if let Err(e) = export_timeseries(&output.records, Path::new(path)) {
            eprintln!("error: failed to write timeseries: {e}");
            process::exit(1);
        }
        eprintln!("Timeseries written to {path}");
    }
}
