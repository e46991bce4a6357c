//! rust_voom command-line interface

use std::path::PathBuf;

use clap::Parser;
use log::{info, LevelFilter};

use rust_voom::cli::{Cli, Commands};
use rust_voom::io::{write_camera, write_log_cpm, write_top_table};
use rust_voom::normalization::DEFAULT_PRIOR_COUNT;
use rust_voom::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "normalize", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_voom {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            counts_dir,
            counts,
            count_column,
            samples,
            group,
            covariate,
            contrast,
            config,
            gene_sets,
            annotation,
            lfc,
            p_value,
            cpm_threshold,
            min_samples,
            keep_lib_sizes,
            threads,
            output,
        }) => {
            let inputs = RunInputs {
                counts_dir,
                counts,
                count_column,
                samples,
                group,
                covariates: covariate,
                gene_sets,
                annotation,
            };
            let overrides = RunOverrides {
                config,
                contrasts: contrast,
                lfc,
                p_value,
                cpm_threshold,
                min_samples,
                keep_lib_sizes,
                output,
            };
            run_analysis(&inputs, overrides, threads)
        }
        Some(Commands::Normalize { counts, output, method }) => run_normalize(&counts, &output, &method),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_voom v{}", VERSION);
    println!("Run `rust_voom -h` for usage or `rust_voom --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_voom v{}", VERSION);
    println!();
    println!("Usage: rust_voom <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full voom analysis");
    println!("  normalize  Write TMM-normalized log-CPM");
    println!();
    println!("Run `rust_voom <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rust_voom v{}", VERSION);
    println!("limma-voom style RNA-seq differential expression analysis in Rust");
    println!();
    println!("Usage: rust_voom <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full voom analysis");
    println!("               - TMM normalization and CPM filtering");
    println!("               - voom precision weights from the mean-variance trend");
    println!("               - Moderated t-tests, or treat with --lfc");
    println!("               - Multi-factor designs with categorical covariates");
    println!("               - camera gene set tests");
    println!("  normalize  Write TMM-normalized log-CPM");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rust_voom run --counts-dir counts/ --count-column 3 --samples samples.tsv \\");
    println!("    --group group --covariate lane -o mouse");
    println!();
    println!("  rust_voom run --counts counts.tsv --samples samples.tsv --group group \\");
    println!("    --contrast \"BasalvsLP = Basal-LP\" --lfc 1 --gene-sets h.all.gmt");
    println!();
    println!("  rust_voom normalize -c counts.tsv -o logcpm.tsv");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

struct RunInputs {
    counts_dir: Option<String>,
    counts: Option<String>,
    count_column: usize,
    samples: String,
    group: String,
    covariates: Vec<String>,
    gene_sets: Option<String>,
    annotation: Option<String>,
}

/// Command-line values that take precedence over the configuration file
struct RunOverrides {
    config: Option<String>,
    contrasts: Vec<String>,
    lfc: Option<f64>,
    p_value: Option<f64>,
    cpm_threshold: Option<f64>,
    min_samples: Option<usize>,
    keep_lib_sizes: bool,
    output: Option<String>,
}

impl RunOverrides {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading configuration from: {}", path);
                PipelineConfig::from_json_file(path)?
            }
            None => PipelineConfig::default(),
        };
        if !self.contrasts.is_empty() {
            config.contrasts = self.contrasts;
        }
        if let Some(lfc) = self.lfc {
            config.lfc_threshold = lfc;
        }
        if let Some(p) = self.p_value {
            config.decide.p_value = p;
        }
        if let Some(cpm) = self.cpm_threshold {
            config.filter.cpm_threshold = cpm;
        }
        if let Some(n) = self.min_samples {
            config.filter.min_samples = Some(n);
        }
        if self.keep_lib_sizes {
            config.filter.library_sizes = LibrarySizePolicy::Retain;
        }
        if let Some(prefix) = self.output {
            config.output_prefix = prefix;
        }
        config.validate()?;
        Ok(config)
    }
}

/// `<prefix>_<suffix>`, with characters unsafe in file names replaced
fn output_path(prefix: &str, suffix: &str) -> PathBuf {
    let suffix: String = suffix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
        .collect();
    PathBuf::from(format!("{}_{}", prefix, suffix))
}

fn run_analysis(inputs: &RunInputs, overrides: RunOverrides, threads: usize) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(threads).build_global().ok();
    }

    let config = overrides.into_config()?;

    let counts = match (&inputs.counts_dir, &inputs.counts) {
        (Some(dir), _) => {
            if inputs.count_column < 2 {
                return Err(VoomError::InvalidParameter {
                    reason: format!("--count-column must be at least 2, got {}", inputs.count_column),
                });
            }
            info!("Loading per-sample counts from: {}", dir);
            read_count_directory(
                dir,
                CountColumns {
                    gene: 0,
                    count: inputs.count_column - 1,
                },
            )?
        }
        (None, Some(path)) => {
            info!("Loading count matrix from: {}", path);
            read_count_table(path)?
        }
        (None, None) => {
            return Err(VoomError::InvalidParameter {
                reason: "one of --counts-dir or --counts is required".to_string(),
            });
        }
    };
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    info!("Loading sample sheet from: {}", inputs.samples);
    let design = read_sample_design(&inputs.samples, &inputs.group, &inputs.covariates)?;

    let annotation = inputs.annotation.as_deref().map(read_annotation).transpose()?;
    let gene_sets = inputs.gene_sets.as_deref().map(read_gene_sets).transpose()?;

    let output = run_pipeline(&counts, &design, &config)?;
    let prefix = &config.output_prefix;

    let results_path = output_path(prefix, "results.tsv");
    info!("Writing results to: {}", results_path.display());
    write_results(&results_path, &output.fit, annotation.as_ref())?;

    let decisions_path = output_path(prefix, "decisions.tsv");
    info!("Writing decisions to: {}", decisions_path.display());
    write_decisions(&decisions_path, &output.decisions)?;

    for contrast in output.fit.contrast_names() {
        let rows = top_table(&output.fit, contrast, None)?;
        let path = output_path(prefix, &format!("top_{}.tsv", contrast));
        info!("Writing ranked genes for {} to: {}", contrast, path.display());
        write_top_table(&path, &rows, annotation.as_ref())?;
    }

    if let Some(sets) = gene_sets {
        info!("Testing {} gene sets with camera...", sets.len());
        let camera_results = output.gene_set_tests(&sets, &config.camera)?;
        let camera_path = output_path(prefix, "camera.tsv");
        info!("Writing gene set results to: {}", camera_path.display());
        write_camera(&camera_path, &camera_results)?;
    }

    println!("\n{}", output.decisions);
    Ok(())
}

fn run_normalize(counts_path: &str, output_path: &str, method: &str) -> Result<()> {
    let norm_method = match method {
        "tmm" => NormMethod::Tmm,
        "none" => NormMethod::None,
        _ => {
            return Err(VoomError::InvalidParameter {
                reason: format!("Unknown normalization method: {}. Use: tmm or none", method),
            });
        }
    };

    info!("Loading count matrix from: {}", counts_path);
    let counts = read_count_table(counts_path)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    info!("Estimating normalization factors using {} method...", method);
    let factors = calc_norm_factors(&counts, norm_method, &TmmParams::default())?;
    let normalized = NormalizedMatrix::new(&counts, &factors, DEFAULT_PRIOR_COUNT)?;

    info!("Writing log-CPM to: {}", output_path);
    write_log_cpm(output_path, &normalized)?;

    info!("Done!");
    Ok(())
}
