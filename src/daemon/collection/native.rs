//! Browser native messaging transport. Every message is a 32-bit length in native byte order
//! followed by that many bytes of UTF-8 JSON. The browser writes to our stdin and reads our
//! stdout.

use anyhow::Result;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
    sync::CancellationToken,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::events::InboundMessage;

/// Browsers refuse host messages above 1 MiB.
pub const MAX_OUTBOUND_MESSAGE: usize = 1024 * 1024;
const MAX_INBOUND_MESSAGE: usize = 64 * 1024 * 1024;

pub fn native_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .native_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Reads browser messages and forwards them to the processing module. End of input means the
/// browser went away: the channel is closed so everything already received is still processed.
pub struct SignalSource<R> {
    frames: FramedRead<R, LengthDelimitedCodec>,
    next: mpsc::Sender<InboundMessage>,
    shutdown: CancellationToken,
}

impl<R: AsyncRead + Unpin> SignalSource<R> {
    pub fn new(reader: R, next: mpsc::Sender<InboundMessage>, shutdown: CancellationToken) -> Self {
        Self {
            frames: FramedRead::new(reader, native_codec(MAX_INBOUND_MESSAGE)),
            next,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                frame = self.frames.next() => frame,
            };

            match frame {
                Some(Ok(bytes)) => match serde_json::from_slice::<InboundMessage>(&bytes) {
                    Ok(message) => {
                        let span = info_span!("Forwarding browser message");
                        debug!("Received {message:?}");
                        self.next
                            .send(message)
                            .instrument(span)
                            .await
                            .inspect_err(|e| error!("Processing module is gone {e:?}"))?;
                    }
                    Err(e) => {
                        warn!(
                            "Skipping malformed message {}: {e}",
                            String::from_utf8_lossy(&bytes)
                        )
                    }
                },
                Some(Err(e)) => {
                    error!("Browser channel failed {e:?}");
                    return Err(e.into());
                }
                None => {
                    info!("Browser closed the channel");
                    return Ok(());
                }
            }
        }
    }
}

/// Writes responses back to the browser until every sender is dropped.
pub struct ResponseSink<W, T> {
    frames: FramedWrite<W, LengthDelimitedCodec>,
    receiver: mpsc::Receiver<T>,
}

impl<W: AsyncWrite + Unpin, T: Serialize> ResponseSink<W, T> {
    pub fn new(writer: W, receiver: mpsc::Receiver<T>) -> Self {
        Self {
            frames: FramedWrite::new(writer, native_codec(MAX_OUTBOUND_MESSAGE)),
            receiver,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(response) = self.receiver.recv().await {
            let payload = serde_json::to_vec(&response)?;
            if payload.len() > MAX_OUTBOUND_MESSAGE {
                error!(
                    "Dropping a response of {} bytes, the browser would reject it",
                    payload.len()
                );
                continue;
            }
            self.frames.send(Bytes::from(payload)).await?;
        }
        SinkExt::<Bytes>::close(&mut self.frames).await?;
        Ok(())
    }
}
