// The verbosity stuff is cribbed from https://github.com/clap-rs/clap-verbosity-flag/blob/c621a6a8a7c0b6df8f1464a985a5d076b4915693/src/lib.rs and updated for tracing

#![deny(unused_crate_dependencies)]

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use isamples_export::{
    ExportOptions, ExportReport, Exporter, Prefetch, QueryContext,
    collection::AssembleOptions,
    geoparquet,
    manifest,
    source::{DEFAULT_PAGE_SIZE, DEFAULT_PREFETCH_DEPTH, DEFAULT_URL, ExportServiceSource},
};
use isamples_export_validate::Validator;
use serde_json::json;
use serve::Site;
use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};
use tracing::metadata::Level;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt,
};

pub mod serve;

/// isamples-export: Export iSamples search results as a STAC collection backed by GeoParquet
#[derive(Debug, Parser)]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        help = ErrorLevel::verbose_help(),
        long_help = ErrorLevel::verbose_long_help(),
    )]
    verbose: u8,

    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        help = ErrorLevel::quiet_help(),
        long_help = ErrorLevel::quiet_long_help(),
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

/// An isamples-export subcommand.
#[derive(Debug, Subcommand)]
#[allow(clippy::large_enum_variant)]
pub enum Command {
    /// Exports every record matching a query.
    ///
    /// The data file and its collection are written to
    /// `<destination>/<export id>/`, and the manifest and root catalog in
    /// `<destination>` are updated.
    Export {
        /// The solr query, e.g. `source:SESAR`.
        query: String,

        /// The destination directory.
        destination: PathBuf,

        #[command(flatten)]
        server: Server,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Exports the records that changed since the last export in a directory.
    ///
    /// The query and server are read from the directory's manifest.
    Refresh {
        /// The destination directory of a previous export.
        directory: PathBuf,

        #[command(flatten)]
        server: Server,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Validates a STAC collection file.
    ///
    /// Exits with a non-zero status if the collection is invalid.
    Validate {
        /// The collection file.
        infile: PathBuf,
    },

    /// Prints the row count, columns, and geo metadata of an exported data file.
    ///
    /// Only the file footer is read.
    Inspect {
        /// The GeoParquet data file.
        infile: PathBuf,
    },

    /// Serves an export destination for browsing.
    ///
    /// The destination is served at `/data` with byte range support. `/`
    /// redirects to the hosted STAC browser unless a local build is given.
    Serve {
        /// The destination directory.
        directory: PathBuf,

        /// The address to serve from.
        #[arg(long = "addr", default_value = "127.0.0.1:8000")]
        addr: String,

        /// A directory of viewer pages to serve at `/ui`.
        #[arg(long = "ui")]
        ui: Option<PathBuf>,

        /// A local STAC browser build to serve at `/`.
        #[arg(long = "browser")]
        browser: Option<PathBuf>,
    },
}

/// Where to export from.
#[derive(Debug, clap::Args)]
pub struct Server {
    /// The iSamples export service.
    ///
    /// Refreshes default to the server recorded in the manifest.
    #[arg(long = "url")]
    url: Option<String>,

    /// A JSON web token for the server.
    #[arg(long = "jwt", env = "ISAMPLES_JWT", hide_env_values = true)]
    jwt: Option<String>,
}

/// How to export.
#[derive(Debug, clap::Args)]
pub struct ExportArgs {
    /// The number of records requested per page.
    #[arg(long = "page-size", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// The number of records written per row group.
    #[arg(long = "batch-size", default_value_t = geoparquet::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// The number of pages to fetch ahead.
    ///
    /// Use 0 to fetch pages one at a time.
    #[arg(long = "prefetch", default_value_t = DEFAULT_PREFETCH_DEPTH)]
    prefetch: usize,

    /// The collection title.
    #[arg(long = "title")]
    title: Option<String>,

    /// The collection description.
    #[arg(long = "description")]
    description: Option<String>,

    /// Exit with a non-zero status if the collection is invalid.
    ///
    /// The collection and data file are written either way.
    #[arg(long = "fail-on-invalid", default_value_t = false)]
    fail_on_invalid: bool,
}

#[derive(Copy, Clone, Debug, Default)]
struct ErrorLevel;

impl Args {
    /// Runs this command.
    ///
    /// If `init_tracing_subscriber` is `false`, it is expected that the caller
    /// is setting up the appropriate logging.
    pub async fn run(self, init_tracing_subscriber: bool) -> Result<()> {
        if init_tracing_subscriber {
            let indicatif_layer = IndicatifLayer::new();
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer().with_writer(
                        indicatif_layer
                            .get_stderr_writer()
                            .with_max_level(self.log_level().unwrap_or(Level::WARN)),
                    ),
                )
                .with(indicatif_layer)
                .init();
        }
        match self.command {
            Command::Export {
                query,
                destination,
                server,
                export,
            } => {
                let url = server.url.unwrap_or_else(|| DEFAULT_URL.to_string());
                let context = QueryContext::new(query);
                run_export(&context, &destination, &url, server.jwt, &export).await
            }
            Command::Refresh {
                directory,
                server,
                export,
            } => {
                let context = QueryContext::refresh_from(&directory)?;
                let url = match server.url {
                    Some(url) => url,
                    None => manifest::read(&directory)?
                        .pop()
                        .and_then(|entry| entry.export_server_url)
                        .unwrap_or_else(|| DEFAULT_URL.to_string()),
                };
                run_export(&context, &directory, &url, server.jwt, &export).await
            }
            Command::Validate { infile } => validate(&infile).await,
            Command::Inspect { infile } => {
                tokio::task::spawn_blocking(move || inspect(&infile)).await?
            }
            Command::Serve {
                directory,
                addr,
                ui,
                browser,
            } => {
                Site {
                    data: directory,
                    ui,
                    browser,
                }
                .serve(&addr)
                .await
            }
        }
    }

    /// Returns the log level set by `-v` and `-q`, if any.
    pub fn log_level(&self) -> Option<Level> {
        level_enum(self.verbosity())
    }

    fn verbosity(&self) -> i8 {
        level_value(ErrorLevel::default()) - (self.quiet as i8) + (self.verbose as i8)
    }
}

impl ExportArgs {
    /// Returns the export options for these arguments.
    pub fn options(&self, url: &str) -> ExportOptions {
        let prefetch = if self.prefetch == 0 {
            Prefetch::Sequential
        } else {
            Prefetch::Pipelined(self.prefetch)
        };
        ExportOptions::default()
            .with_page_size(self.page_size)
            .with_batch_size(self.batch_size)
            .with_prefetch(prefetch)
            .with_assemble(AssembleOptions {
                title: self.title.clone(),
                description: self.description.clone(),
                ..Default::default()
            })
            .with_server_url(url.to_string())
    }
}

impl ErrorLevel {
    fn default() -> Option<Level> {
        Some(Level::ERROR)
    }

    fn verbose_help() -> Option<&'static str> {
        Some("Increase verbosity")
    }

    fn verbose_long_help() -> Option<&'static str> {
        None
    }

    fn quiet_help() -> Option<&'static str> {
        Some("Decrease verbosity")
    }

    fn quiet_long_help() -> Option<&'static str> {
        None
    }
}

async fn run_export(
    context: &QueryContext,
    destination: &Path,
    url: &str,
    jwt: Option<String>,
    args: &ExportArgs,
) -> Result<()> {
    let source = ExportServiceSource::new(url)?.with_jwt(jwt);
    let report = Exporter::new(source, args.options(url))
        .export(context, destination)
        .await?;
    print_report(&report)?;
    if args.fail_on_invalid && !report.is_valid() {
        Err(anyhow!(
            "collection {} is invalid",
            report.collection_path.display()
        ))
    } else {
        Ok(())
    }
}

fn print_report(report: &ExportReport) -> Result<()> {
    let anomalies: serde_json::Map<String, serde_json::Value> = report
        .anomalies
        .iter()
        .map(|(kind, count)| (kind.to_string(), json!(count)))
        .collect();
    let value = json!({
        "collection": report.collection_path,
        "data": report.data_file.path,
        "records": report.records,
        "bytes": report.data_file.size,
        "valid": report.is_valid(),
        "errors": report.validation.errors,
        "anomalies": anomalies,
    });
    print_json(&value)
}

async fn validate(infile: &Path) -> Result<()> {
    let value: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(infile)?))?;
    let result = Validator::new()?.validate_value(&value).await?;
    if result.is_valid() {
        println!("OK");
        Ok(())
    } else {
        for error in &result.errors {
            println!("{error}");
        }
        Err(anyhow!(
            "{} has {} validation error(s)",
            infile.display(),
            result.errors.len()
        ))
    }
}

fn inspect(infile: &Path) -> Result<()> {
    let summary = geoparquet::read_summary(infile)?;
    print_json(&serde_json::to_value(summary)?)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn level_enum(verbosity: i8) -> Option<Level> {
    match verbosity {
        i8::MIN..=-1 => None,
        0 => Some(Level::ERROR),
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        4..=i8::MAX => Some(Level::TRACE),
    }
}

fn level_value(level: Option<Level>) -> i8 {
    match level {
        None => -1,
        Some(Level::ERROR) => 0,
        Some(Level::WARN) => 1,
        Some(Level::INFO) => 2,
        Some(Level::DEBUG) => 3,
        Some(Level::TRACE) => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::{Args, Command, level_enum};
    use clap::Parser;
    use isamples_export::Prefetch;
    use rstest::rstest;
    use tracing::metadata::Level;

    #[rstest]
    #[case(&[], Some(Level::ERROR))]
    #[case(&["-v"], Some(Level::WARN))]
    #[case(&["-vv"], Some(Level::INFO))]
    #[case(&["-vvvvvv"], Some(Level::TRACE))]
    #[case(&["-q"], None)]
    fn log_level(#[case] flags: &[&str], #[case] expected: Option<Level>) {
        let mut argv = vec!["isamples-export"];
        argv.extend_from_slice(flags);
        argv.extend(["inspect", "data.parquet"]);
        let args = Args::parse_from(argv);
        assert_eq!(args.log_level(), expected);
    }

    #[test]
    fn verbosity_bounds() {
        assert_eq!(level_enum(i8::MIN), None);
        assert_eq!(level_enum(i8::MAX), Some(Level::TRACE));
    }

    #[test]
    fn export_options() {
        let args = Args::parse_from([
            "isamples-export",
            "export",
            "source:SESAR",
            "out",
            "--page-size",
            "50",
            "--prefetch",
            "0",
            "--title",
            "Rocks",
        ]);
        let Command::Export { export, server, .. } = args.command else {
            panic!("not an export");
        };
        assert!(server.url.is_none());
        let options = export.options("https://example.com/");
        assert_eq!(options.page_size, 50);
        assert_eq!(options.writer.batch_size, 10_000);
        assert_eq!(options.prefetch, Prefetch::Sequential);
        assert_eq!(options.assemble.title.as_deref(), Some("Rocks"));
        assert_eq!(options.server_url.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn serve_defaults() {
        let args = Args::parse_from(["isamples-export", "serve", "out"]);
        let Command::Serve {
            directory,
            addr,
            ui,
            browser,
        } = args.command
        else {
            panic!("not a serve");
        };
        assert_eq!(directory, std::path::PathBuf::from("out"));
        assert_eq!(addr, "127.0.0.1:8000");
        assert!(ui.is_none());
        assert!(browser.is_none());
    }

    #[test]
    fn default_prefetch() {
        let args = Args::parse_from(["isamples-export", "refresh", "out"]);
        let Command::Refresh { export, .. } = args.command else {
            panic!("not a refresh");
        };
        assert_eq!(export.options("").prefetch, Prefetch::Pipelined(2));
    }
}

#[cfg(test)]
use assert_cmd as _;
