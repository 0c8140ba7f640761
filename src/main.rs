use anyhow::Error;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, Instrument};

use convq::blob::{FileBlob, LocalBlobStore};
use convq::completion::CompletionHandler;
use convq::config::Config;
use convq::db::DbHandle;
use convq::queue::PgQueue;
use convq::submit::RequestSubmitter;
use convq::{server, store, telemetry, ConversionParams};

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version, about = "Video conversion job orchestrator")]
pub struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
enum Command {
    /// Consume worker results and reconcile request state
    Serve,
    /// Submit a video for conversion and print the resulting request
    Submit {
        #[arg(help = "Video file to convert")]
        file: PathBuf,
        #[arg(long = "owner")]
        owner_id: i64,
        #[arg(long, default_value = "0")]
        bitrate: i64,
        #[arg(long, default_value = "0")]
        width: i32,
        #[arg(long, default_value = "0")]
        height: i32,
        #[arg(long, default_value = "0")]
        ratio_x: i32,
        #[arg(long, default_value = "0")]
        ratio_y: i32,
    },
    /// Print a request with its videos
    Status { id: i64 },
}

#[instrument(skip_all)]
async fn setup(cli: Cli, cancel_token: CancellationToken) -> Result<(), Error> {
    let config = cli.config;
    let db = DbHandle::connect(&config.connect_url, config.max_connections).await?;
    let queue = Arc::new(PgQueue::new(
        db.pool(),
        config.jobs_topic.clone(),
        config.results_topic.clone(),
    ));
    let db = Arc::new(db);

    match cli.command {
        Command::Serve => {
            let handler = CompletionHandler::new(db.clone(), db.clone(), config.deadline());
            let reset = queue.reset_processing().await?;
            debug!("Returned {} unsettled results to the queue", reset);

            let stats = server::serve(cancel_token, config.consumer(), queue, handler)
                .instrument(info_span!("server"))
                .await?;
            info!(?stats, "Consumer finished");
        }
        Command::Submit {
            file,
            owner_id,
            bitrate,
            width,
            height,
            ratio_x,
            ratio_y,
        } => {
            let submitter = RequestSubmitter::new(
                db.clone(),
                db.clone(),
                Arc::new(LocalBlobStore::new(&config.blob_root)),
                queue,
                config.deadline(),
            );
            let params = ConversionParams {
                bitrate,
                resolution_width: width,
                resolution_height: height,
                ratio_x,
                ratio_y,
            };
            let blob = FileBlob::open(&file).await?;
            match submitter.submit(&cancel_token, owner_id, params, blob).await {
                Ok(request) => println!("{}", serde_json::to_string_pretty(&request)?),
                Err(err) => {
                    if let Some(request) = &err.request {
                        println!("{}", serde_json::to_string_pretty(request)?);
                    }
                    return Err(err.into());
                }
            }
        }
        Command::Status { id } => {
            let request = store::fetch_with_videos(&*db, &*db, id).await?;
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let telemetry = telemetry::init(&cli.config)?;

    let token = CancellationToken::new();

    let cloned_token = token.clone();
    let app = tokio::spawn(setup(cli, cloned_token));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {info!("Received SIGTERM"); token.cancel()},
            _ = sigint.recv() => {info!("Received SIGINT"); token.cancel()},
        }
    });
    let result = app.await?;
    info!("Shutting down.");
    drop(telemetry);

    Ok(result?)
}
