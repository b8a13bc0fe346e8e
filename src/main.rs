use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use readiness::config::{AppConfig, ReadinessConfig};
use readiness::error::AppError;
use readiness::readiness::{
    readiness_router, write_csv, FsArtifactStore, MemoryStore, ReadinessService, RoleId,
    SubjectId,
};
use readiness::telemetry::{self, LogTarget};
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

type Service = ReadinessService<MemoryStore, FsArtifactStore>;

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "readiness",
    about = "Score, recompute, and train role readiness models from the command line",
    version
)]
struct Cli {
    /// Override READINESS_DATA_PATH
    #[arg(long, global = true)]
    data: Option<PathBuf>,
    /// Override READINESS_MODELS_DIR
    #[arg(long, global = true)]
    models: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Score one subject against one role
    Score(ScoreArgs),
    /// Recompute and upsert readiness for every subject/role pair
    Recompute(RecomputeArgs),
    /// Train and publish the readiness models from stored records
    Train,
    /// Show published model status and evaluation metrics
    Report,
    /// Write the historical feature matrix as CSV
    ExportFeatures(ExportArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    #[arg(long)]
    subject: i64,
    #[arg(long)]
    role: i64,
    /// Skip the learned models and use the weighted matcher only
    #[arg(long)]
    rule_based: bool,
}

#[derive(Args, Debug)]
struct RecomputeArgs {
    /// Skip the learned models and use the weighted matcher only
    #[arg(long)]
    rule_based: bool,
    /// Stop between pairs once this many seconds have elapsed
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Destination file; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(data) = cli.data {
        config.readiness.data_path = data;
    }
    if let Some(models) = cli.models {
        config.readiness.models_dir = models;
    }

    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(config, args).await,
        other => {
            telemetry::init(&config.telemetry, LogTarget::Stderr)?;
            run_command(&config.readiness, other)
        }
    }
}

fn build_service(config: &ReadinessConfig) -> Result<Arc<Service>, AppError> {
    let store = open_store(&config.data_path)?;
    let artifacts = FsArtifactStore::new(&config.models_dir);
    let service = ReadinessService::new(
        Arc::new(store),
        Arc::new(artifacts),
        config.classifier,
        config.training(),
    )
    .with_prefer_ml(config.prefer_ml);
    Ok(Arc::new(service))
}

fn open_store(path: &Path) -> Result<MemoryStore, AppError> {
    if path.exists() {
        Ok(MemoryStore::load_json(path)?)
    } else {
        info!(path = %path.display(), "no readiness data file; starting empty");
        Ok(MemoryStore::new())
    }
}

fn run_command(config: &ReadinessConfig, command: Command) -> Result<(), AppError> {
    let service = build_service(config)?;

    match command {
        Command::Score(args) => {
            let prefer_ml = !args.rule_based && service.prefer_ml();
            let result =
                service.compute_score(SubjectId(args.subject), RoleId(args.role), prefer_ml)?;
            print_json(&result)
        }
        Command::Recompute(args) => {
            let prefer_ml = !args.rule_based && service.prefer_ml();
            let deadline = args
                .deadline_secs
                .map(|secs| Instant::now() + Duration::from_secs(secs));
            let summary = service.recompute_all(prefer_ml, deadline)?;
            service.repository().save_json(&config.data_path)?;
            print_json(&summary)
        }
        Command::Train => {
            let report = service.train_models()?;
            print_json(&report.flatten())
        }
        Command::Report => print_json(&service.model_report()?),
        Command::ExportFeatures(args) => {
            let examples = service.training_examples()?;
            match args.output {
                Some(path) => write_csv(&examples, BufWriter::new(File::create(path)?))?,
                None => write_csv(&examples, io::stdout().lock())?,
            }
            Ok(())
        }
        Command::Serve(_) => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(io::Error::from)?;
    writeln!(stdout)?;
    Ok(())
}

async fn run_server(mut config: AppConfig, mut args: ServeArgs) -> Result<(), AppError> {
    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, LogTarget::Stdout)?;

    let service = build_service(&config.readiness)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let ops = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state);

    let app = Router::new()
        .merge(ops)
        .merge(readiness_router(service))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        classifier = %config.readiness.classifier,
        "readiness service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::try_parse_from(["readiness"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn score_command_takes_ids() {
        let cli = Cli::try_parse_from([
            "readiness",
            "--data",
            "fixtures.json",
            "score",
            "--subject",
            "4",
            "--role",
            "2",
            "--rule-based",
        ])
        .expect("parses");
        assert_eq!(cli.data, Some(PathBuf::from("fixtures.json")));
        match cli.command {
            Some(Command::Score(args)) => {
                assert_eq!((args.subject, args.role), (4, 2));
                assert!(args.rule_based);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn readiness_endpoint_reports_initializing() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(false)),
            metrics: handle,
        };
        let response = readiness_endpoint(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
