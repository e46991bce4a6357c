//! Command-line interface for rust_voom

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rust_voom")]
#[command(version)]
#[command(about = "limma-voom differential expression analysis in Rust")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full voom analysis
    #[command(
        about = "Run the full voom analysis",
        long_about = "Run the full voom analysis\n\n\
            Performs TMM normalization, filtering of lowly expressed genes, voom\n\
            precision weights, weighted linear models per gene and moderated t-tests\n\
            for each contrast. Optionally tests gene sets with camera.",
        after_long_help = "\
Examples:
  # One count file per sample, gene id in column 1 and counts in column 3
  rust_voom run --counts-dir counts/ --count-column 3 --samples samples.tsv \\
    --group group --covariate lane -o mouse

  # Wide count table with explicit contrasts
  rust_voom run --counts counts.tsv --samples samples.tsv --group group \\
    --contrast \"Basal-LP\" --contrast \"LP-ML\"

  # Require |logFC| > 1 and test Hallmark gene sets
  rust_voom run --counts counts.tsv --samples samples.tsv --group group \\
    --lfc 1 --gene-sets h.all.gmt"
    )]
    Run {
        /// Directory with one count file per sample
        #[arg(long, value_name = "DIR", conflicts_with = "counts", required_unless_present = "counts",
            long_help = "Directory with one count file per sample.\n\
                Each file holds a gene id column and a count column; the sample id is\n\
                the file name without its extension. Genes must match across files.")]
        counts_dir: Option<String>,

        /// Wide count table (genes x samples)
        #[arg(short, long, value_name = "FILE",
            long_help = "Wide count table.\n\
                Format: first column = gene IDs, remaining columns = raw counts per sample.\n\
                Supports both CSV (comma) and TSV (tab) delimiters (auto-detected).")]
        counts: Option<String>,

        /// 1-based column of the count in per-sample files [default: 2]
        #[arg(long, default_value = "2")]
        count_column: usize,

        /// Sample sheet
        #[arg(short, long, value_name = "FILE",
            long_help = "Sample sheet with a header row.\n\
                Sample ids come from the 'sample' column, or the first column if\n\
                there is none. Every count sample must appear exactly once.")]
        samples: String,

        /// Group column of the sample sheet [default: group]
        #[arg(short, long, default_value = "group")]
        group: String,

        /// Additional categorical covariate
        #[arg(long, value_name = "VAR",
            long_help = "Additional categorical covariates, e.g. sequencing lane.\n\
                Can be specified multiple times: --covariate lane --covariate batch")]
        covariate: Vec<String>,

        /// Contrast expression (repeatable)
        #[arg(long, value_name = "EXPR",
            long_help = "Contrast between group levels, e.g. \"Basal-LP\" or\n\
                \"BasalvsLP = Basal-LP\". Can be specified multiple times.\n\
                Without this, every pairwise group difference is tested.")]
        contrast: Vec<String>,

        /// JSON configuration file
        #[arg(long, value_name = "FILE",
            long_help = "JSON configuration file. Missing fields take their defaults;\n\
                command-line flags override values from the file.")]
        config: Option<String>,

        /// Gene sets in GMT format for camera
        #[arg(long, value_name = "FILE")]
        gene_sets: Option<String>,

        /// Gene annotation (gene_id, symbol, chromosome)
        #[arg(long, value_name = "FILE")]
        annotation: Option<String>,

        /// Log2 fold change threshold for treat
        #[arg(long,
            long_help = "Minimum log2 fold change. When > 0, genes are tested with treat\n\
                against H0: |logFC| <= threshold instead of the ordinary moderated t-test.")]
        lfc: Option<f64>,

        /// Adjusted p-value cutoff for calls
        #[arg(short, long)]
        p_value: Option<f64>,

        /// CPM threshold for filtering
        #[arg(long)]
        cpm_threshold: Option<f64>,

        /// Minimum expressed samples per gene
        #[arg(long,
            long_help = "Minimum number of samples with CPM above the threshold.\n\
                Defaults to 3 unless the configuration file sets another value.")]
        min_samples: Option<usize>,

        /// Keep unfiltered library sizes
        #[arg(long,
            long_help = "Keep the library sizes of the unfiltered counts.\n\
                By default library sizes are recomputed from the retained genes.")]
        keep_lib_sizes: bool,

        /// Number of threads (0 = auto) [default: 0]
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// Output file prefix
        #[arg(short, long, value_name = "PREFIX")]
        output: Option<String>,
    },

    /// Write TMM-normalized log-CPM
    #[command(
        long_about = "Normalize counts with TMM and write the log-CPM matrix.\n\n\
            Outputs log2(CPM + prior count) with effective library sizes.",
        after_long_help = "\
Examples:
  rust_voom normalize -c counts.tsv -o logcpm.tsv
  rust_voom normalize -c counts.tsv -o logcpm.tsv -m none"
    )]
    Normalize {
        /// Wide count table (genes x samples)
        #[arg(short, long)]
        counts: String,

        /// Output file path
        #[arg(short, long)]
        output: String,

        /// Normalization method [default: tmm]
        #[arg(short, long, default_value = "tmm",
            long_help = "Normalization method.\n\
                tmm:  Trimmed mean of M-values\n\
                none: All factors 1")]
        method: String,
    },
}
