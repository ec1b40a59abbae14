//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real main that:
//! - loads `.env` and sets up logging
//! - parses CLI arguments
//! - runs the fit/scan pipelines or writes a synthetic sweep
//! - prints reports and writes optional exports

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, FitArgs, InputArgs, ScanArgs, SimulateArgs};
use crate::data::sample::{SweepSpec, synthetic_sweep};
use crate::domain::FitOptions;
use crate::error::AppError;
use crate::io::export::{ResultDocument, write_fit_json, write_scan_csv, write_sweep_csv};
use crate::io::ingest::{IngestOptions, load_scan};

pub mod pipeline;
pub mod scan;

use pipeline::{FitConfig, Methods};

/// Entry point for the `cfit` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Scan(args) => handle_scan(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

/// `RUST_LOG` wins unless `--debug` is given; default level is `warn`.
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A second init (e.g. in tests) is not an error worth surfacing.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args);
    let run = pipeline::run_fit(&config)?;

    println!("{}", crate::report::format_fit_report(&run, &config));

    if let Some(path) = &config.export_json {
        let mut doc = ResultDocument::new(&config.file, run.sweep.len(), &config.options);
        if let Some(circle) = &run.circle {
            doc.calibration = Some(circle.calibration.params);
            doc.values = circle.outcome.values();
            doc.outcome = Some(circle.outcome.clone());
            doc.fano_range = circle.fano_range;
            doc.single_photon_limit_dbm = circle.single_photon_limit_dbm;
        }
        doc.lorentzian = run.lorentzian;
        doc.skewed_lorentzian = run.skewed_lorentzian;
        doc.fano = run.fano;
        write_fit_json(path, &doc)?;
    }

    Ok(())
}

fn handle_scan(args: ScanArgs) -> Result<(), AppError> {
    let config = FitConfig {
        export_csv: args.export_csv.clone(),
        ..base_config(&args.input)
    };
    let ingested = load_scan(&config.file, &config.ingest)?;
    for e in &ingested.row_errors {
        tracing::warn!(line = e.line, "{}", e.message);
    }

    let run = scan::fit_scan(&ingested.lines, &config);
    println!("{}", crate::report::format_scan_summary(&run));

    if let Some(path) = &config.export_csv {
        write_scan_csv(path, &run.session)?;
    }
    if run.failed() == run.results.len() {
        return Err(AppError::new(4, "All scan lines failed to fit."));
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let spec = SweepSpec {
        port: args.port,
        fr: args.fr,
        qr: args.qr,
        qc: args.qc,
        phi0: args.phi0,
        a: args.a,
        alpha: args.alpha,
        delay: args.delay,
        a2: 0.0,
        span: args.span,
        points: args.points,
        noise: args.noise,
        seed: args.seed,
    };
    let sweep = synthetic_sweep(&spec)?;
    write_sweep_csv(&args.out, &sweep)?;
    println!("Wrote {} points to {}", sweep.len(), args.out.display());
    Ok(())
}

fn base_config(input: &InputArgs) -> FitConfig {
    FitConfig {
        file: input.file.clone(),
        ingest: IngestOptions {
            format: input.format,
            freq_unit: input.freq_unit,
        },
        f_min: input.f_min,
        f_max: input.f_max,
        prefilter: input.prefilter,
        options: FitOptions {
            refine_results: input.refine,
            error_mode: input.errors,
            ignore_slope: !input.keep_slope,
            guess_delay: !input.no_guess_delay,
            fixed_delay: input.delay,
            fr_seed: input.fr,
            qr_seed: input.qr,
            port: input.port,
        },
        methods: Methods::default(),
        isolation_db: input.isolation,
        power_dbm: None,
        export_json: None,
        export_csv: None,
    }
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    let methods = if args.all {
        Methods::all()
    } else if args.lorentzian || args.skewed_lorentzian || args.fano {
        Methods {
            circle: args.circle,
            lorentzian: args.lorentzian,
            skewed_lorentzian: args.skewed_lorentzian,
            fano: args.fano,
        }
    } else {
        Methods::default()
    };
    FitConfig {
        methods,
        power_dbm: args.power,
        export_json: args.export_json.clone(),
        ..base_config(&args.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    fn fit_args(argv: &[&str]) -> FitArgs {
        let mut full = vec!["cfit", "fit", "--file", "x.txt"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Fit(args) => args,
            _ => panic!("expected fit command"),
        }
    }

    #[test]
    fn circle_is_the_default_method() {
        let config = fit_config_from_args(&fit_args(&[]));
        assert_eq!(config.methods, Methods::default());
        assert!(config.options.ignore_slope);
        assert!(config.options.guess_delay);
    }

    #[test]
    fn amplitude_flag_alone_skips_circle() {
        let config = fit_config_from_args(&fit_args(&["--lorentzian"]));
        assert!(!config.methods.circle);
        assert!(config.methods.lorentzian);
    }

    #[test]
    fn flags_map_to_fit_options() {
        let config = fit_config_from_args(&fit_args(&["--keep-slope", "--no-guess-delay", "--delay", "3e-8", "--refine"]));
        assert!(!config.options.ignore_slope);
        assert!(!config.options.guess_delay);
        assert_eq!(config.options.fixed_delay, Some(3e-8));
        assert!(config.options.refine_results);
    }
}
