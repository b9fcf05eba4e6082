use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value as Json};
use stencil_compose::{decode_stream, run_function, Limits, Passthrough, Render, RenderError};
use stencil_core::{Request, Response};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stencilctl", version, about = "Stencil composition CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one request through the pipeline and print the response
    Run {
        /// Request file (JSON or YAML)
        #[arg(long = "request", env = "STENCIL_REQUEST")]
        request: PathBuf,
        /// Use this file as the rendered stream instead of the request's template
        #[arg(long = "rendered")]
        rendered: Option<PathBuf>,
        /// Pretty-print JSON output
        #[arg(long = "pretty", action = ArgAction::SetTrue)]
        pretty: bool,
    },
    /// Split and decode a rendered stream, reporting each document
    Decode {
        /// Rendered manifest stream
        file: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("STENCIL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    let Ok(addr) = std::env::var("STENCIL_METRICS_ADDR") else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(()) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(_) => warn!(addr = %addr, "invalid STENCIL_METRICS_ADDR; expected host:port"),
    }
}

/// Hands back a pre-rendered stream regardless of the template.
struct Rendered(String);

impl Render for Rendered {
    fn render(&self, _template: &str, _data: &Json) -> Result<String, RenderError> {
        Ok(self.0.clone())
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_request(path: &Path) -> Result<Request> {
    let text = read(path)?;
    if let Ok(req) = serde_json::from_str::<Request>(&text) { return Ok(req); }
    let yaml: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let value = serde_json::to_value(yaml).context("converting YAML request to JSON")?;
    serde_json::from_value(value).with_context(|| format!("decoding request from {}", path.display()))
}

fn print_response(rsp: &Response, output: Output, pretty: bool) -> Result<()> {
    match output {
        Output::Json => {
            let text = if pretty { serde_json::to_string_pretty(rsp)? } else { serde_json::to_string(rsp)? };
            println!("{}", text);
        }
        Output::Human => {
            for r in &rsp.results {
                println!("{:?}: {}", r.severity, r.message);
            }
            if let Some(xr) = &rsp.desired.composite {
                let kind = xr.kind().unwrap_or("-");
                let status = xr.resource.get("status").map(|s| s.to_string()).unwrap_or_else(|| "{}".into());
                println!("composite {} • status {} • {} connection details", kind, status, xr.connection_details.len());
            }
            for (name, r) in &rsp.desired.resources {
                println!("member {} • {} • ready {:?}", name, r.kind().unwrap_or("-"), r.ready);
            }
            if let Some(reqs) = &rsp.requirements {
                for (key, sel) in &reqs.resources {
                    println!("requires {} • {}/{}", key, sel.api_version, sel.kind);
                }
            }
            for c in &rsp.conditions {
                println!("condition {} • {:?} • {}", c.type_, c.status, c.reason);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let limits = Limits::from_env();

    match cli.command {
        Commands::Run { request, rendered, pretty } => {
            info!(request = %request.display(), rendered = ?rendered, "run invoked");
            let req = load_request(&request)?;
            let rsp = match rendered {
                Some(path) => run_function(&req, &Rendered(read(&path)?), &limits),
                None => run_function(&req, &Passthrough, &limits),
            };
            print_response(&rsp, cli.output, pretty)?;
            if rsp.is_fatal() { std::process::exit(1); }
        }
        Commands::Decode { file } => {
            info!(file = %file.display(), "decode invoked");
            let text = read(&file)?;
            let docs = match decode_stream(&text, &limits) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("decode error: {}", e);
                    std::process::exit(1);
                }
            };
            match cli.output {
                Output::Human => {
                    for d in &docs {
                        println!("document {} • line {} • {} {}", d.index, d.line, d.api_version(), d.kind());
                    }
                }
                Output::Json => {
                    let rows: Vec<Json> = docs
                        .iter()
                        .map(|d| json!({"index": d.index, "line": d.line, "object": d.object}))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
    }
    Ok(())
}
