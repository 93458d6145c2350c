use std::time::Duration;

use anyhow::Result;
use durability::{DurabilityController, write_snapshot};
use protocol::{Request, Response};
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::utils::clock::Clock;

use super::{
    accounting::reconciler::{FlushReason, Reconciler},
    collection::events::{EngineEvent, InboundMessage, RequestAction, Routed},
    storage::kv::StorageError,
};

pub mod durability;
pub mod protocol;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// A `saveTimeData` request waiting for everything up to `generation` to be written.
struct SaveWaiter {
    id: u64,
    generation: u64,
}

type FlushOutcome = (u64, Result<(), StorageError>);

/// Single writer of the engine. Browser messages are handled one at a time, each to
/// completion, so the attribution state and the store never see interleaved mutations. Writes
/// run as separate tasks and never block event handling; at most one is in flight.
pub struct ProcessingModule {
    receiver: mpsc::Receiver<InboundMessage>,
    responses: mpsc::Sender<Response>,
    reconciler: Reconciler,
    durability: DurabilityController,
    clock: Box<dyn Clock>,
    flush_interval: Duration,
    shutdown: CancellationToken,
    in_flight: JoinSet<FlushOutcome>,
    flush_requested: bool,
    waiters: Vec<SaveWaiter>,
}

impl ProcessingModule {
    pub fn new(
        receiver: mpsc::Receiver<InboundMessage>,
        responses: mpsc::Sender<Response>,
        durability: DurabilityController,
        clock: Box<dyn Clock>,
        flush_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            responses,
            reconciler: Reconciler::new(),
            durability,
            clock,
            flush_interval,
            shutdown,
            in_flight: JoinSet::new(),
            flush_requested: false,
            waiters: Vec::new(),
        }
    }

    /// Executes the processing event loop until shutdown or until the source closes.
    pub async fn run(mut self) -> Result<()> {
        let mut next_tick = self.clock.instant() + self.flush_interval;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.finish_flush(joined).await;
                }
                message = self.receiver.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
                _ = self.clock.sleep_until(next_tick) => {
                    next_tick += self.flush_interval;
                    self.handle_event(EngineEvent::Tick);
                    self.request_flush(FlushReason::Interval);
                }
            }
            self.start_flush_if_needed().await;
        }

        self.finalize().await
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        debug!("Processing message {message:?}");
        match Routed::from(message) {
            Routed::Event(event) => self.handle_event(event),
            Routed::Request { id, action, data } => self.handle_request(id, action, data).await,
            Routed::Ignored => {}
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        let now = self.clock.time();
        let effects = self.reconciler.reconcile(event, now);
        if let Some(reason) = self.durability.apply(effects) {
            self.request_flush(reason);
        }
    }

    async fn handle_request(&mut self, id: u64, action: RequestAction, data: Option<Value>) {
        let request = match Request::parse(action, data) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting {action:?} request {id}: {e}");
                self.respond(Response::error(id, e.to_string())).await;
                return;
            }
        };
        info!("Handling {action:?} request {id}");

        // Pending time is settled first so readers and writers see up to date numbers.
        self.handle_event(EngineEvent::Tick);

        match request {
            Request::GetTimeData => {
                let store = self.durability.store().clone();
                self.respond(Response::time_data(id, store)).await;
            }
            Request::SaveTimeData => {
                let generation = self.durability.generation();
                if self.durability.is_persisted(generation) {
                    self.respond(Response::success(id)).await;
                } else {
                    self.waiters.push(SaveWaiter { id, generation });
                    self.request_flush(FlushReason::Request);
                }
            }
            Request::ClearTimeDataCache => {
                self.durability.clear();
                self.request_flush(FlushReason::Request);
                self.respond(Response::success(id)).await;
            }
            Request::UpdateTimeDataCache(store) => {
                self.durability.replace(store);
                self.respond(Response::success(id)).await;
            }
            Request::ImportTimeData(store) => {
                info!("Importing statistics for {} domains", store.len());
                match self.durability.import(&store) {
                    Ok(()) => {
                        self.request_flush(FlushReason::Request);
                        self.respond(Response::success(id)).await;
                    }
                    Err(e) => {
                        warn!("Rejecting import {id}: {e}");
                        self.respond(Response::error(id, e.to_string())).await;
                    }
                }
            }
        }
    }

    fn request_flush(&mut self, reason: FlushReason) {
        debug!("Flush requested: {reason:?}");
        self.flush_requested = true;
    }

    async fn start_flush_if_needed(&mut self) {
        if !self.flush_requested || !self.in_flight.is_empty() {
            return;
        }
        self.flush_requested = false;

        match self.durability.prepare_flush().await {
            Ok(Some(snapshot)) => {
                let storage = self.durability.storage().clone();
                let generation = snapshot.generation;
                self.in_flight
                    .spawn(async move { (generation, write_snapshot(storage, snapshot).await) });
            }
            Ok(None) => self.answer_waiters(None).await,
            Err(e) => {
                error!("Couldn't prepare flush: {e}");
                self.answer_waiters(Some(e.to_string())).await;
            }
        }
    }

    async fn finish_flush(&mut self, joined: Result<FlushOutcome, tokio::task::JoinError>) {
        match joined {
            Ok((generation, result)) => {
                self.durability.complete_flush(generation, &result);
                self.answer_waiters(result.err().map(|e| e.to_string()))
                    .await;
            }
            Err(e) => {
                error!("Flush task failed {e:?}");
                self.answer_waiters(Some(e.to_string())).await;
            }
        }
    }

    /// Answers save requests that are now covered by storage. With a `failure` the remaining
    /// ones get an error, otherwise they wait for the next flush.
    async fn answer_waiters(&mut self, failure: Option<String>) {
        let mut pending = Vec::new();
        for waiter in std::mem::take(&mut self.waiters) {
            let response = if self.durability.is_persisted(waiter.generation) {
                Response::success(waiter.id)
            } else if let Some(message) = &failure {
                Response::error(waiter.id, message.clone())
            } else {
                pending.push(waiter);
                continue;
            };
            self.respond(response).await;
        }
        if !pending.is_empty() {
            self.flush_requested = true;
        }
        self.waiters = pending;
    }

    async fn respond(&self, response: Response) {
        if let Err(e) = self.responses.send(response.fit_for_browser()).await {
            warn!("Response channel is closed, dropping {:?}", e.0);
        }
    }

    /// Settles pending time and makes a last attempt to write everything.
    async fn finalize(mut self) -> Result<()> {
        info!("Processing stopped, flushing statistics");
        self.handle_event(EngineEvent::Suspend);

        while let Some(joined) = self.in_flight.join_next().await {
            self.finish_flush(joined).await;
        }

        let result = self.durability.flush().await;
        let failure = match &result {
            Ok(()) => "engine stopped before the data was written".to_string(),
            Err(e) => e.to_string(),
        };
        self.answer_waiters(Some(failure)).await;
        self.receiver.close();
        result.inspect_err(|e| error!("Final flush failed {e}"))?;
        Ok(())
    }
}
