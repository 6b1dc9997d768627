// bases/download_cli/src/args.rs
use clap::{Parser, Subcommand};
use release_primitives::AudioFormat;
use std::path::PathBuf;

/// Download free releases (and ones you own) from Bandcamp pages
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Release or artist/label page URLs
    pub urls: Vec<String>,

    /// Directory to store downloads in
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Address to send email-gated downloads to; `auto` uses a disposable inbox
    #[arg(short, long, default_value = "auto")]
    pub email: String,

    /// Country sent with email download requests
    #[arg(long, default_value = "United States")]
    pub country: String,

    /// Postcode sent with email download requests
    #[arg(long, default_value = "00000")]
    pub zipcode: String,

    /// FLAC, V0MP3, 320MP3, AAC, Ogg, ALAC, WAV or AIFF
    #[arg(short, long, default_value = "FLAC")]
    pub format: AudioFormat,

    /// Netscape cookies.txt with a logged-in session
    #[arg(short, long)]
    pub cookies: Option<PathBuf>,

    /// Value of the session's `identity` cookie
    #[arg(long)]
    pub identity: Option<String>,

    /// Download history file
    #[arg(long)]
    pub download_history_file: Option<PathBuf>,

    /// JSON-lines record of releases that could not be downloaded
    #[arg(long)]
    pub failure_log: Option<PathBuf>,

    /// Download even when the history says a release is complete
    #[arg(long)]
    pub force: bool,

    /// Keep archives as downloaded
    #[arg(short = 'z', long)]
    pub no_unzip: bool,

    /// Seconds to wait for a download email
    #[arg(long, default_value_t = 30)]
    pub email_timeout: u64,

    /// Releases of a collection downloaded concurrently
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Attempts per release before giving up
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Forget every downloaded release
    Clear,
}
