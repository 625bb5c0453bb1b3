//! Synthetic producer used to exercise a relay without real capture
//! hardware.
//!
//! It connects like any other client, so the relay promotes it to producer
//! as soon as the first frame arrives.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, StreamExt};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::select;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};

use crate::{
    cli::MockArgs,
    message::{Envelope, FRAME, STATS, decode, encode},
    telemetry::{FramePayload, StatsPayload},
};

const FRAME_WIDTH: u32 = 1920;
const FRAME_HEIGHT: u32 = 1080;

/// Generates plausible frame and stats payloads.
pub struct MockTelemetry<R = StdRng> {
    rng: R,
    started: Instant,
    frames_sent: u64,
}

impl MockTelemetry<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for MockTelemetry<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> MockTelemetry<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            started: Instant::now(),
            frames_sent: 0,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn next_frame(&mut self) -> FramePayload {
        self.frames_sent += 1;
        FramePayload {
            timestamp: unix_millis(),
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            fps: self.rng.gen_range(10.0..30.0),
            processing_mode: self.rng.gen_range(0..=3),
            processing_time: self.rng.gen_range(5.0..50.0),
        }
    }

    pub fn stats(&mut self) -> StatsPayload {
        StatsPayload {
            average_fps: self.rng.gen_range(15.0..25.0),
            max_fps: self.rng.gen_range(25.0..35.0),
            min_fps: self.rng.gen_range(5.0..15.0),
            average_processing_time: self.rng.gen_range(10.0..40.0),
            total_frames: self.frames_sent,
            uptime: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

pub async fn run(args: MockArgs) -> Result<()> {
    let (socket, _) = connect_async(args.server.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!(server = %args.server, "mock producer connected");

    let (mut sink, mut stream) = socket.split();
    let mut telemetry = MockTelemetry::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));

    loop {
        select! {
            _ = ticker.tick() => {
                if !publish_tick(&mut sink, &mut telemetry, &args).await? {
                    break;
                }
            }
            incoming = stream.next() => {
                if !handle_incoming(incoming)? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = sink.close().await {
        debug!(?error, "failed to close relay connection cleanly");
    }
    info!(frames = telemetry.frames_sent(), "mock producer stopped");
    Ok(())
}

/// Sends one frame, plus stats on every `stats_every`-th frame. Returns
/// `false` once the requested frame count has been reached.
async fn publish_tick<S, R>(sink: &mut S, telemetry: &mut MockTelemetry<R>, args: &MockArgs) -> Result<bool>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Rng,
{
    let frame = Envelope::from_payload(FRAME, &telemetry.next_frame())?;
    send_envelope(sink, &frame).await?;

    if telemetry.frames_sent() % args.stats_every == 0 {
        let stats = Envelope::from_payload(STATS, &telemetry.stats())?;
        send_envelope(sink, &stats).await?;
    }

    Ok(args
        .count
        .map_or(true, |count| telemetry.frames_sent() < count))
}

async fn send_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(Message::Text(encode(envelope)))
        .await
        .with_context(|| format!("failed to send {} message", envelope.kind))
}

fn handle_incoming(incoming: Option<Result<Message, tungstenite::Error>>) -> Result<bool> {
    match incoming {
        Some(Ok(Message::Text(text))) => {
            match decode(&text) {
                Ok(envelope) => info!(kind = %envelope.kind, data = %envelope.data, "message from relay"),
                Err(error) => debug!(%error, "ignoring undecodable message from relay"),
            }
            Ok(true)
        }
        Some(Ok(Message::Close(_))) | None => {
            info!("relay closed the connection");
            Ok(false)
        }
        Some(Ok(_)) => Ok(true),
        Some(Err(error)) => Err(error).context("relay connection failed"),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
