//! Writer half of an endpoint: queue draining, coalescing and keepalive.

use std::sync::Arc;

use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::error::RelayError;
use crate::settings::EndpointSettings;
use crate::state::{Lifecycle, QueueState};

/// The only task writing to the connection.
pub(crate) struct Writer<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    text_rx: mpsc::Receiver<String>,
    binary_rx: mpsc::Receiver<Vec<u8>>,
    lifecycle: Arc<Lifecycle>,
    settings: Arc<EndpointSettings>,
}

/// Why the write loop stopped.
enum Exit {
    /// Flush what is queued, then close.
    Drain,
    /// Close without flushing.
    Abort,
}

impl<S> Writer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        sink: SplitSink<WebSocketStream<S>, Message>,
        text_rx: mpsc::Receiver<String>,
        binary_rx: mpsc::Receiver<Vec<u8>>,
        lifecycle: Arc<Lifecycle>,
        settings: Arc<EndpointSettings>,
    ) -> Self {
        Self {
            sink,
            text_rx,
            binary_rx,
            lifecycle,
            settings,
        }
    }

    pub(crate) async fn run(mut self) {
        let exit = match self.pump().await {
            Ok(exit) => exit,
            Err(e) => {
                debug!("writer stopped: {e}");
                Exit::Abort
            }
        };

        if let Exit::Drain = exit {
            if let Err(e) = self.flush_queued().await {
                debug!("flush on shutdown failed: {e}");
            }
        }

        // Stops the reader as well.
        self.lifecycle.close();
        if timeout(self.settings.write_wait, self.sink.close()).await.is_err() {
            debug!("close frame timed out");
        }
        debug!("writer finished");
    }

    async fn pump(&mut self) -> Result<Exit, RelayError> {
        let period = self.settings.ping_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut lifecycle = self.lifecycle.subscribe();

        loop {
            match *lifecycle.borrow_and_update() {
                QueueState::Open => {}
                QueueState::Draining => return Ok(Exit::Drain),
                QueueState::Closed => return Ok(Exit::Abort),
            }

            tokio::select! {
                Some(text) = self.text_rx.recv() => {
                    let batch = coalesce_text(text, &mut self.text_rx);
                    self.write(Message::Text(batch)).await?;
                }
                Some(data) = self.binary_rx.recv() => {
                    let batch = coalesce_binary(data, &mut self.binary_rx);
                    self.write(Message::Binary(batch)).await?;
                }
                _ = ticker.tick() => {
                    trace!("keepalive ping");
                    self.write(Message::Ping(Vec::new())).await?;
                }
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        return Ok(Exit::Abort);
                    }
                }
            }
        }
    }

    /// Write everything still sitting in either queue.
    async fn flush_queued(&mut self) -> Result<(), RelayError> {
        if let Ok(text) = self.text_rx.try_recv() {
            let batch = coalesce_text(text, &mut self.text_rx);
            self.write(Message::Text(batch)).await?;
        }
        if let Ok(data) = self.binary_rx.try_recv() {
            let batch = coalesce_binary(data, &mut self.binary_rx);
            self.write(Message::Binary(batch)).await?;
        }
        Ok(())
    }

    async fn write(&mut self, message: Message) -> Result<(), RelayError> {
        let wait = self.settings.write_wait;
        timeout(wait, self.sink.send(message))
            .await
            .map_err(|_| RelayError::Timeout(wait))??;
        Ok(())
    }
}

/// Join `first` with every text message already queued, newline-separated.
pub(crate) fn coalesce_text(first: String, rx: &mut mpsc::Receiver<String>) -> String {
    let mut batch = first;
    while let Ok(next) = rx.try_recv() {
        batch.push('\n');
        batch.push_str(&next);
    }
    batch
}

/// Concatenate `first` with every binary message already queued.
pub(crate) fn coalesce_binary(first: Vec<u8>, rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<u8> {
    let mut batch = first;
    while let Ok(next) = rx.try_recv() {
        batch.extend_from_slice(&next);
    }
    batch
}
