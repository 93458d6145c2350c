use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use collection::{
    events::InboundMessage,
    native::{ResponseSink, SignalSource},
};
use processing::{ProcessingModule, durability::DurabilityController, protocol::Response};
use storage::kv::{FileStore, KeyValueStore};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::utils::clock::{Clock, DefaultClock};

pub mod accounting;
pub mod args;
pub mod collection;
pub mod processing;
pub mod shutdown;
pub mod storage;

/// Directory under the application directory holding the key-value files.
pub const STORE_DIR: &str = "store";

const CHANNEL_CAPACITY: usize = 64;

/// Represents the starting point for the daemon. The browser talks to it over stdin/stdout and
/// it runs until the browser closes the pipe or the process is asked to stop.
pub async fn start_daemon(dir: PathBuf, flush_interval: Duration) -> Result<()> {
    let storage = Arc::new(FileStore::new(dir.join(STORE_DIR))?);
    info!("Using store at {:?}", storage.dir());

    let shutdown_token = CancellationToken::new();
    let engine = async {
        let result = run_engine(
            tokio::io::stdin(),
            tokio::io::stdout(),
            storage,
            DefaultClock,
            flush_interval,
            shutdown_token.clone(),
        )
        .await;
        shutdown_token.cancel();
        result
    };
    let (_, result) = tokio::join!(shutdown::detect_shutdown(shutdown_token.clone()), engine);
    result
}

/// Wires the browser channel to the processing module and runs both to completion.
pub async fn run_engine(
    reader: impl AsyncRead + Unpin,
    writer: impl AsyncWrite + Unpin,
    storage: Arc<dyn KeyValueStore>,
    clock: impl Clock,
    flush_interval: Duration,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let (sender, receiver) = mpsc::channel::<InboundMessage>(CHANNEL_CAPACITY);
    let (response_sender, response_receiver) = mpsc::channel::<Response>(CHANNEL_CAPACITY);

    let source = SignalSource::new(reader, sender, shutdown_token.clone());
    let sink = ResponseSink::new(writer, response_receiver);
    let processor = create_processor(
        storage,
        receiver,
        response_sender,
        &shutdown_token,
        clock,
        flush_interval,
    )
    .await;

    let (source_result, processing_result, sink_result) =
        tokio::join!(source.run(), processor.run(), sink.run());

    if let Err(source_result) = source_result {
        error!("Signal source got an error {:?}", source_result);
    }

    if let Err(sink_result) = sink_result {
        error!("Response sink got an error {:?}", sink_result);
    }

    processing_result.inspect_err(|e| error!("Processing module got an error {:?}", e))
}

async fn create_processor(
    storage: Arc<dyn KeyValueStore>,
    receiver: mpsc::Receiver<InboundMessage>,
    responses: mpsc::Sender<Response>,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
    flush_interval: Duration,
) -> ProcessingModule {
    let durability = DurabilityController::load(storage).await;
    ProcessingModule::new(
        receiver,
        responses,
        durability,
        Box::new(clock),
        flush_interval,
        shutdown_token.clone(),
    )
}
