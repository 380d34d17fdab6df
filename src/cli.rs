use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "transcoder")]
#[command(author, version, about = "Queue-driven video transcode workers")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker pool until interrupted
    Worker {
        /// Number of concurrent worker loops (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Create a task and queue it
    Submit {
        /// Object key of the input video
        key: String,

        /// Input bucket (defaults to worker.input_bucket)
        #[arg(long)]
        bucket: Option<String>,

        /// Output bucket (defaults to worker.default_output_bucket)
        #[arg(long)]
        output_bucket: Option<String>,

        /// Transcode type to produce; repeat for several
        #[arg(long = "type", short = 't', required = true)]
        types: Vec<String>,
    },

    /// Show a task as JSON
    Status {
        task_id: String,
    },

    /// List tasks, newest first
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<String>,

        /// Only tasks created on this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// Page size (0 = configured default)
        #[arg(long, default_value = "0")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Reset a finished task and queue it again
    Retry {
        task_id: String,
    },

    /// Cancel a task that has not started
    Cancel {
        task_id: String,
    },

    /// Fail a running task and stop its encoder
    Abort {
        task_id: String,
    },

    /// Show queue depth
    QueueStatus,

    /// Drop every queued message
    Purge,

    /// Detect and print platform capabilities
    Platform,

    /// List transcode profiles
    Profiles {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run raw encoder parameters against the sample input
    TestEncode {
        /// Input file (defaults to encoding.sample_input)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output file extension
        #[arg(long, default_value = "mp4")]
        ext: String,

        /// Encoder parameters placed between input and output
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        params: Vec<String>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate,

    /// Display version information
    Version,
}
