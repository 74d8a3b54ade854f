use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use log_shipper::config::{Cli, SinkDsn};
use log_shipper::error::PipelineError;
use log_shipper::reader::FileTailer;
use log_shipper::writer::InfluxWriter;
use log_shipper::{logging, pipeline, server, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "log shipper terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), PipelineError> {
    // ── 1. Validate configuration ────────────────────────────────
    let config = cli.pipeline_config()?;
    let dsn: SinkDsn = cli.influx_dsn.parse()?;

    // ── 2. Open source and sink ──────────────────────────────────
    let reader = FileTailer::open(&cli.path, config.poll_interval).await?;
    let writer = Arc::new(InfluxWriter::new(dsn)?);

    // ── 3. Bind the status listener before starting work ────────
    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .map_err(|source| PipelineError::Bind {
            addr: cli.listen.clone(),
            source,
        })?;

    // ── 4. Start the pipeline ────────────────────────────────────
    let shutdown = CancellationToken::new();
    let pipeline = pipeline::spawn(&config, Box::new(reader), writer, shutdown.clone());

    let state = Arc::new(AppState {
        stats: pipeline.stats(),
    });
    let app = server::create_router(state);

    info!(addr = %cli.listen, "status endpoint → http://{}/monitor", cli.listen);

    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
    });

    // ── 5. Run until interrupted or the reader fails ─────────────
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "failed to listen for interrupt");
            }
            info!("interrupt received, draining pipeline");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }

    let result = pipeline.join().await;
    let served = match server.await {
        Ok(served) => served.map_err(PipelineError::Serve),
        Err(e) => Err(PipelineError::Task(e.to_string())),
    };

    let status = result?;
    served?;
    info!(
        handle_line = status.handle_line,
        err_num = status.err_num,
        "log shipper stopped"
    );
    Ok(())
}
