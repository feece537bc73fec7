use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use failure::ResultExt;
use mongodb::bson::Bson;
use mongodb::bson::Document;
use prometheus::Encoder;
use prometheus::Registry;
use prometheus::TextEncoder;
use slog::debug;
use slog::info;

use crate::config::Config;
use crate::logging;
use crate::logging::LogLevel;
use crate::register_metrics;
use crate::Connector;
use crate::ErrorKind;
use crate::Result;
use crate::Row;

/// Run a MongoDB query and print the resulting rows as JSON lines.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Specifies the configuration file to use.
    #[arg(short, long, value_name = "FILE", default_value = "mongorows.yaml")]
    pub config: PathBuf,

    /// Specifies the logging verbosity, overriding the configuration file.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Collection to query.
    #[arg(long)]
    pub collection: String,

    /// Query filter in MongoDB extended JSON or shell syntax.
    #[arg(short, long, default_value = "{}")]
    pub query: String,

    /// Stop after this many rows.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Write Prometheus metrics in text format to this file once the export completes.
    #[arg(long, value_name = "FILE")]
    pub metrics_file: Option<PathBuf>,
}

/// Process command line arguments and export the requested rows.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_file(&cli.config)?;
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    let logger = logging::configure(&config.logging);
    debug!(logger, "mongorows starting"; "config" => cli.config.display().to_string());

    let registry = Registry::new();
    register_metrics(&logger, &registry);

    // Failures are reported once, by the caller.
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let rows = export(&cli, &config, &logger, &mut out)?;
    info!(logger, "Rows exported"; "collection" => &cli.collection, "rows" => rows);

    if let Some(path) = &cli.metrics_file {
        let mut file = File::create(path).with_context(|_| ErrorKind::Output)?;
        write_metrics(&mut file, &registry)?;
        debug!(logger, "Metrics written"; "path" => path.display().to_string());
    }
    Ok(())
}

fn export<W: Write>(cli: &Cli, config: &Config, logger: &slog::Logger, out: &mut W) -> Result<u64> {
    let mut connector = Connector::new(logger.clone());
    connector.init(&config.mongo)?;
    let rows = connector.query(&cli.query, &cli.collection)?;
    let mut count = 0;
    for row in rows.take(cli.limit.unwrap_or(usize::MAX)) {
        write_row(out, row?)?;
        count += 1;
    }
    out.flush().with_context(|_| ErrorKind::Output)?;
    connector.close();
    Ok(count)
}

/// Write a row as a single line of relaxed extended JSON, with fields sorted by name.
pub fn write_row<W: Write>(out: &mut W, row: Row) -> Result<()> {
    let mut fields: Vec<(String, Bson)> = row.into_iter().collect();
    fields.sort_by(|(left, _), (right, _)| left.cmp(right));
    let document: Document = fields.into_iter().collect();
    let json = Bson::Document(document).into_relaxed_extjson();
    writeln!(out, "{}", json).with_context(|_| ErrorKind::Output)?;
    Ok(())
}

/// Write all metrics in the registry using the Prometheus text format.
pub fn write_metrics<W: Write>(out: &mut W, registry: &Registry) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|error| failure::err_msg(error.to_string()))
        .context(ErrorKind::Output)?;
    out.write_all(&buffer).with_context(|_| ErrorKind::Output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use clap::Parser;
    use mongodb::bson::doc;
    use prometheus::Registry;
    use slog::o;
    use slog::Logger;

    use super::write_metrics;
    use super::write_row;
    use super::Cli;
    use crate::flatten;
    use crate::logging::LogLevel;

    #[test]
    fn cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["mongorows", "--collection", "items"]).unwrap();
        assert_eq!(cli.config.to_str(), Some("mongorows.yaml"));
        assert_eq!(cli.query, "{}");
        assert_eq!(cli.limit, None);
        assert_eq!(cli.log_level, None);
        assert_eq!(cli.metrics_file, None);
    }

    #[test]
    fn cli_options() {
        let cli = Cli::try_parse_from([
            "mongorows",
            "--collection",
            "items",
            "--log-level",
            "debug",
            "--limit",
            "10",
            "-q",
            r#"{"a": 1}"#,
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.limit, Some(10));
        assert_eq!(cli.query, r#"{"a": 1}"#);
    }

    #[test]
    fn rows_as_json_lines() {
        let mut out = Vec::new();
        write_row(&mut out, flatten(doc! {"b": "x", "a": 1, "c": {"d": true}})).unwrap();
        write_row(&mut out, flatten(doc! {"z": null})).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, "{\"a\":1,\"b\":\"x\",\"c\":{\"d\":true}}\n{\"z\":null}\n");
    }

    #[test]
    fn metrics_as_text() {
        let logger = Logger::root(slog::Discard, o!());
        let registry = Registry::new();
        crate::register_metrics(&logger, &registry);
        crate::metrics::ROWS_COUNT
            .with_label_values(&["cli_metrics"])
            .inc();
        let mut out = Vec::new();
        write_metrics(&mut out, &registry).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("# TYPE mongorows_rows counter"));
        assert!(out.contains(r#"mongorows_rows{collection="cli_metrics"}"#));
    }
}
