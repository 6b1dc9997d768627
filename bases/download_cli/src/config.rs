// bases/download_cli/src/config.rs
use crate::args::CliArgs;
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;
use release_downloader::{
    Authentication, EmailIdentity, EngineOptions, Mailbox, ReleaseRetry, GUERRILLA_API,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const APP_DIR: &str = "free-bandcamp-downloader";
const HISTORY_FILE: &str = "downloaded.txt";
const FAILURE_FILE: &str = "failures.jsonl";

/// Everything one invocation needs, resolved from the command line
#[derive(Debug, Clone)]
pub struct Config {
    pub urls: Vec<Url>,
    pub history_file: PathBuf,
    pub failure_log: PathBuf,
    pub clear_history: bool,
    pub debug: bool,
    pub engine: EngineOptions,
}

impl Config {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let clear_history = args.command.is_some();
        if args.urls.is_empty() && !clear_history {
            bail!("no URLs given");
        }

        let urls = args
            .urls
            .iter()
            .map(|raw| Url::parse(raw).wrap_err_with(|| format!("invalid URL {raw:?}")))
            .collect::<Result<Vec<_>>>()?;

        let history_file = match args.download_history_file {
            Some(path) => path,
            None => default_history_file()?,
        };
        let failure_log = args
            .failure_log
            .unwrap_or_else(|| sibling(&history_file, FAILURE_FILE));

        let mailbox = if args.email.eq_ignore_ascii_case("auto") {
            Mailbox::Disposable {
                api: Url::parse(GUERRILLA_API)?,
            }
        } else if args.email.contains('@') {
            Mailbox::Address(args.email.clone())
        } else {
            bail!("{:?} is neither an email address nor `auto`", args.email);
        };

        let engine = EngineOptions {
            download_dir: args.dir,
            format: args.format,
            mailbox,
            identity: EmailIdentity {
                country: args.country,
                postcode: args.zipcode,
            },
            unpack: !args.no_unzip,
            force: args.force,
            email_timeout: Duration::from_secs(args.email_timeout),
            release_retry: ReleaseRetry {
                max_attempts: args.retries.max(1),
                ..ReleaseRetry::default()
            },
            jobs: args.jobs.max(1),
            auth: Authentication {
                cookies_file: args.cookies,
                identity: args.identity,
            },
            ..EngineOptions::default()
        };

        Ok(Self {
            urls,
            history_file,
            failure_log,
            clear_history,
            debug: args.debug,
            engine,
        })
    }

    /// Default tracing filter for this invocation
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "download_cli=debug,release_downloader=debug,download_ledger=debug,release_tagging=debug"
        } else {
            "download_cli=info,release_downloader=info,download_ledger=info"
        }
    }
}

fn default_history_file() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| eyre!("no data directory for download history"))?;
    Ok(data_dir.join(APP_DIR).join(HISTORY_FILE))
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Command;
    use assert_matches::assert_matches;
    use clap::Parser;
    use release_primitives::AudioFormat;
    use rstest::rstest;

    fn parse(extra: &[&str]) -> Result<Config> {
        let mut argv = vec!["bcdl-free"];
        argv.extend_from_slice(extra);
        Config::from_args(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_follow_the_command_line_help() {
        let config = parse(&[
            "--download-history-file",
            "/data/history.txt",
            "https://artist.bandcamp.com/album/x",
        ])
        .unwrap();

        assert_eq!(config.urls.len(), 1);
        assert_eq!(config.history_file, PathBuf::from("/data/history.txt"));
        assert_eq!(config.failure_log, PathBuf::from("/data/failures.jsonl"));
        assert_eq!(config.engine.format, AudioFormat::Flac);
        assert_eq!(config.engine.identity, EmailIdentity::default());
        assert_eq!(config.engine.email_timeout, Duration::from_secs(30));
        assert_eq!(config.engine.release_retry.max_attempts, 3);
        assert_eq!(config.engine.jobs, 1);
        assert!(config.engine.unpack);
        assert!(!config.engine.force);
        assert_matches!(config.engine.mailbox, Mailbox::Disposable { .. });
        assert_eq!(
            config.log_filter(),
            "download_cli=info,release_downloader=info,download_ledger=info"
        );
    }

    #[test]
    fn flags_reach_engine_options() {
        let config = parse(&[
            "--email",
            "me@example.com",
            "--format",
            "320MP3",
            "--no-unzip",
            "--force",
            "--jobs",
            "4",
            "--retries",
            "5",
            "--email-timeout",
            "90",
            "--cookies",
            "/tmp/cookies.txt",
            "--debug",
            "https://artist.bandcamp.com/music",
        ])
        .unwrap();

        assert_matches!(&config.engine.mailbox, Mailbox::Address(a) if a == "me@example.com");
        assert_eq!(config.engine.format, AudioFormat::Mp3_320);
        assert!(!config.engine.unpack);
        assert!(config.engine.force);
        assert_eq!(config.engine.jobs, 4);
        assert_eq!(config.engine.release_retry.max_attempts, 5);
        assert_eq!(config.engine.email_timeout, Duration::from_secs(90));
        assert_eq!(
            config.engine.auth.cookies_file,
            Some(PathBuf::from("/tmp/cookies.txt"))
        );
        assert!(config.log_filter().contains("release_downloader=debug"));
    }

    #[test]
    fn short_flags_for_cookies_and_unzip() {
        let config = parse(&["-c", "/tmp/cookies.txt", "-z", "https://artist.bandcamp.com/music"])
            .unwrap();

        assert!(!config.engine.unpack);
        assert_eq!(
            config.engine.auth.cookies_file,
            Some(PathBuf::from("/tmp/cookies.txt"))
        );
    }

    #[test]
    fn clear_needs_no_urls() {
        let args = CliArgs::try_parse_from(["bcdl-free", "clear"]).unwrap();
        assert_eq!(args.command, Some(Command::Clear));
        let config = Config::from_args(args).unwrap();
        assert!(config.clear_history);
        assert!(config.urls.is_empty());
    }

    #[rstest]
    #[case::no_urls(&[])]
    #[case::bad_url(&["not a url"])]
    #[case::bad_email(&["--email", "nobody", "https://a.bandcamp.com/album/x"])]
    fn invalid_invocations_are_rejected(#[case] extra: &[&str]) {
        assert!(parse(extra).is_err());
    }

    #[test]
    fn unknown_format_is_a_parse_error() {
        let result = CliArgs::try_parse_from(["bcdl-free", "--format", "MP2", "https://x.test/"]);
        assert!(result.is_err());
    }
}
