//! Streaming synthesis client

use async_stream::stream;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cancel::CancelHandle;
use super::request::SynthesisRequest;
use super::sink::FrameSink;
use crate::audio::{FrameAssembler, StreamEvent};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::status::{PlaybackStatus, StatusNotifier};

/// Issues one POST per utterance and turns the raw PCM body into
/// fixed-size frames.
///
/// Nothing is retried. Every request ends with exactly one
/// [`StreamEvent::EndOfStream`], preceded by a [`StreamEvent::Error`] when
/// it did not complete normally.
#[derive(Clone)]
pub struct SynthesisStreamClient {
    http: Client,
    frame_size: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    status: StatusNotifier,
}

impl SynthesisStreamClient {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        config.validate()?;

        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::NetworkFailure(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            frame_size: config.frame_size,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            status: StatusNotifier::new(),
        })
    }

    /// Publish connection progress to `status` instead of a private notifier
    pub fn with_status(mut self, status: StatusNotifier) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> &StatusNotifier {
        &self.status
    }

    /// Lazily run `request`, yielding its events in order.
    ///
    /// Nothing is sent until the stream is first polled. Dropping the stream
    /// aborts the request.
    pub fn events(
        &self,
        request: SynthesisRequest,
        cancel: CancelHandle,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let http = self.http.clone();
        let status = self.status.clone();
        let frame_size = self.frame_size;
        let read_timeout = self.read_timeout;
        let write_timeout = self.write_timeout;

        stream! {
            let id = request.id();
            let started = Instant::now();
            status.set(PlaybackStatus::Connecting);
            info!(
                request_id = %id,
                speaker = request.speaker(),
                chars = request.text().chars().count(),
                "Requesting synthesis from {}",
                request.endpoint()
            );

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = open(&http, &request, write_timeout) => result,
            };
            let mut response = match opened {
                Ok(response) => response,
                Err(err) => {
                    report(&status, id, &err);
                    yield StreamEvent::Error(err);
                    yield StreamEvent::EndOfStream;
                    return;
                }
            };
            debug!(request_id = %id, "Response headers after {:?}", started.elapsed());

            let mut assembler = FrameAssembler::new(frame_size);
            let mut first_byte_at: Option<SystemTime> = None;
            let mut emitted = 0usize;
            let mut outcome: Result<()> = Ok(());

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    chunk = tokio::time::timeout(read_timeout, response.chunk()) => match chunk {
                        Ok(Ok(chunk)) => Ok(chunk),
                        Ok(Err(e)) => Err(Error::from(e)),
                        Err(_) => Err(Error::Timeout),
                    },
                };

                let chunk = match next {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(err) => {
                        outcome = Err(err);
                        break;
                    }
                };
                if chunk.is_empty() {
                    continue;
                }

                if first_byte_at.is_none() {
                    first_byte_at = Some(SystemTime::now());
                    status.set(PlaybackStatus::Receiving);
                    info!(request_id = %id, "First audio byte after {:?}", started.elapsed());
                }

                assembler.push(&chunk);
                while let Some(frame) = assembler.next_frame() {
                    let is_first = emitted == 0;
                    emitted += 1;
                    yield StreamEvent::frame(frame, is_first, if is_first { first_byte_at } else { None });
                }
            }

            match outcome {
                Ok(()) => {
                    if let Some(frame) = assembler.take_remaining() {
                        let is_first = emitted == 0;
                        emitted += 1;
                        yield StreamEvent::frame(frame, is_first, if is_first { first_byte_at } else { None });
                    }
                    let stats = assembler.stats();
                    info!(
                        request_id = %id,
                        "Stream complete: {} bytes in {} frames after {:?}",
                        stats.bytes_received,
                        emitted,
                        started.elapsed()
                    );
                }
                Err(err) => {
                    // A partial frame is never played after a failure
                    if assembler.pending_len() > 0 {
                        debug!(request_id = %id, "Dropping {} unframed bytes", assembler.pending_len());
                    }
                    report(&status, id, &err);
                    yield StreamEvent::Error(err);
                }
            }
            yield StreamEvent::EndOfStream;
        }
    }

    /// Run `request` to completion, handing every event to `sink`.
    ///
    /// Returns the error the stream ended with, if any.
    pub async fn stream<S: FrameSink>(&self, request: SynthesisRequest, sink: &mut S) -> Result<()> {
        self.stream_with_cancel(request, sink, &CancelHandle::new())
            .await
    }

    pub async fn stream_with_cancel<S: FrameSink>(
        &self,
        request: SynthesisRequest,
        sink: &mut S,
        cancel: &CancelHandle,
    ) -> Result<()> {
        let id = request.id();
        let events = self.events(request, cancel.clone());
        futures::pin_mut!(events);

        let mut result = Ok(());
        while let Some(event) = events.next().await {
            if let StreamEvent::Error(ref err) = event {
                result = Err(err.clone());
            }
            if let Err(err) = sink.accept(event).await {
                debug!(request_id = %id, "Sink stopped accepting events: {}", err);
                return Err(err);
            }
        }
        result
    }
}

async fn open(http: &Client, request: &SynthesisRequest, write_timeout: Duration) -> Result<Response> {
    let send = http
        .post(request.endpoint().clone())
        .form(&request.form())
        .send();

    let response = tokio::time::timeout(write_timeout, send)
        .await
        .map_err(|_| Error::Timeout)??;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::ServerRejected(status.as_u16()));
    }
    Ok(response)
}

fn report(status: &StatusNotifier, id: Uuid, err: &Error) {
    match err {
        Error::Cancelled => info!(request_id = %id, "Synthesis cancelled"),
        _ => warn!(request_id = %id, "Synthesis failed: {}", err),
    }
    status.set(PlaybackStatus::Error(err.clone()));
}
