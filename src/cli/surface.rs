//! Terminal timer surface (`sense-of-time watch`).
//!
//! Attaches to the daemon with `popupOpened`, keeps the connection open as
//! its push stream, answers heartbeat pings and renders every update on a
//! single terminal line. Ctrl-C detaches with `popupClosed`.

use std::future::Future;
use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::types::{IpcRequest, IpcResponse, PushEvent, SurfaceAck, SurfaceId, TimerState};

use super::client::IpcClient;
use super::display::Display;

/// Attempts to re-attach after the daemon connection drops.
const MAX_REATTACH_ATTEMPTS: u32 = 5;

/// Delay between re-attach attempts in milliseconds.
const REATTACH_DELAY_MS: u64 = 1000;

/// Bell rings on completion.
const COMPLETION_BELLS: u32 = 3;

/// Response timeout for `popupOpened`, in seconds.
const ATTACH_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// SurfaceStream
// ============================================================================

/// An attached surface's connection to the daemon.
pub struct SurfaceStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl SurfaceStream {
    /// Reads the next push. `None` means the daemon closed the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn next_event(&mut self) -> Result<Option<PushEvent>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .context("Failed to read from the daemon")?
            else {
                return Ok(None);
            };
            match serde_json::from_str(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => debug!("ignoring unknown push: {}", e),
            }
        }
    }

    /// Answers a heartbeat ping.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn acknowledge(&mut self) -> Result<()> {
        let mut json = serde_json::to_vec(&SurfaceAck { received: true })?;
        json.push(b'\n');
        self.writer
            .write_all(&json)
            .await
            .context("Failed to answer heartbeat")
    }
}

// ============================================================================
// Reaction
// ============================================================================

/// What the surface does with a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Redraw the countdown
    Render(TimerState),
    /// Ring the bell
    Completed,
    /// Answer the heartbeat
    Acknowledge,
    /// Nothing to do
    Ignore,
}

impl From<PushEvent> for Reaction {
    fn from(event: PushEvent) -> Self {
        match event {
            PushEvent::TimerUpdate { timer_state } => Reaction::Render(timer_state),
            PushEvent::TimerCompleted => Reaction::Completed,
            PushEvent::Ping => Reaction::Acknowledge,
            // A terminal cannot raise itself
            PushEvent::Focus => Reaction::Ignore,
        }
    }
}

// ============================================================================
// SurfaceClient
// ============================================================================

/// A terminal surface.
pub struct SurfaceClient {
    client: IpcClient,
    surface_id: Option<SurfaceId>,
    autostart: bool,
    colour: bool,
}

impl SurfaceClient {
    /// Creates a surface. Without an id, the daemon assigns one on attach.
    pub fn new(client: IpcClient, surface_id: Option<SurfaceId>) -> Self {
        Self {
            client,
            surface_id,
            autostart: false,
            colour: false,
        }
    }

    /// Starts the countdown after the first attach unless already running.
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Colours the remaining time.
    pub fn with_colour(mut self, colour: bool) -> Self {
        self.colour = colour;
        self
    }

    /// Identifier of this surface, once known.
    pub fn surface_id(&self) -> Option<&SurfaceId> {
        self.surface_id.as_ref()
    }

    /// Sends `popupOpened` and keeps the connection as the push stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or refuses the attach.
    pub async fn attach(&mut self) -> Result<(SurfaceStream, TimerState)> {
        let stream = self.client.connect().await?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let request = IpcRequest::PopupOpened {
            surface_id: self.surface_id.clone(),
        };
        let mut json = serde_json::to_vec(&request).context("Failed to serialize request")?;
        json.push(b'\n');
        writer
            .write_all(&json)
            .await
            .context("Failed to send popupOpened")?;

        let line = timeout(Duration::from_secs(ATTACH_TIMEOUT_SECS), lines.next_line())
            .await
            .context("Attach timed out")?
            .context("Failed to read attach response")?
            .context("The daemon closed the connection during attach")?;
        let response: IpcResponse =
            serde_json::from_str(&line).context("Failed to parse attach response")?;
        if !response.is_success() {
            anyhow::bail!("{}", response.message);
        }

        let data = response.data.unwrap_or_default();
        if let Some(id) = data.surface_id {
            self.surface_id = Some(id);
        }
        let state = data
            .timer_state
            .context("Attach response carried no timer state")?;

        info!(surface = ?self.surface_id, "attached to daemon");
        Ok((SurfaceStream { lines, writer }, state))
    }

    /// Runs until `shutdown` completes or re-attaching gives up.
    ///
    /// Output goes to `out`; on shutdown the surface detaches.
    ///
    /// # Errors
    ///
    /// Returns an error if the first attach fails or every re-attach does.
    pub async fn run<W: Write>(&mut self, out: &mut W, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        let (mut stream, state) = self.attach().await?;
        self.render(out, &state)?;
        if self.autostart && !state.running {
            let response = self.client.start().await?;
            if let Some(state) = response.timer_state() {
                self.render(out, state)?;
            }
        }

        loop {
            let closed = tokio::select! {
                _ = &mut shutdown => {
                    writeln!(out)?;
                    if let Err(e) = self.client.popup_closed(self.surface_id.clone()).await {
                        warn!("failed to detach: {:#}", e);
                    }
                    return Ok(());
                }
                event = stream.next_event() => match event {
                    Ok(Some(event)) => {
                        self.react(out, &mut stream, event.into()).await?;
                        false
                    }
                    Ok(None) => true,
                    Err(e) => {
                        debug!("push stream failed: {:#}", e);
                        true
                    }
                },
            };

            if closed {
                writeln!(out)?;
                writeln!(out, "Lost connection to the daemon; re-attaching...")?;
                stream = tokio::select! {
                    _ = &mut shutdown => return Ok(()),
                    reattached = self.reattach() => {
                        let (stream, state) = reattached?;
                        self.render(out, &state)?;
                        stream
                    }
                };
            }
        }
    }

    async fn reattach(&mut self) -> Result<(SurfaceStream, TimerState)> {
        let mut last_error = None;
        for attempt in 1..=MAX_REATTACH_ATTEMPTS {
            sleep(Duration::from_millis(REATTACH_DELAY_MS * u64::from(attempt))).await;
            match self.attach().await {
                Ok(attached) => return Ok(attached),
                Err(e) => {
                    warn!(
                        "re-attach failed (attempt {}/{}): {:#}",
                        attempt, MAX_REATTACH_ATTEMPTS, e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("re-attach was not attempted")))
    }

    async fn react<W: Write>(
        &self,
        out: &mut W,
        stream: &mut SurfaceStream,
        reaction: Reaction,
    ) -> Result<()> {
        match reaction {
            Reaction::Render(state) => self.render(out, &state)?,
            Reaction::Acknowledge => stream.acknowledge().await?,
            Reaction::Completed => {
                writeln!(out)?;
                writeln!(out, "Time's up!")?;
                out.flush()?;
                tokio::spawn(ring_bell(COMPLETION_BELLS));
            }
            Reaction::Ignore => {}
        }
        Ok(())
    }

    fn render<W: Write>(&self, out: &mut W, state: &TimerState) -> Result<()> {
        write!(out, "\r{}\x1b[K", Display::render_countdown(state, self.colour))?;
        out.flush()?;
        Ok(())
    }
}

/// Rings the terminal bell `times` times, one second apart.
async fn ring_bell(times: u32) {
    for i in 0..times {
        if i > 0 {
            sleep(Duration::from_secs(1)).await;
        }
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }
}

// ============================================================================
// Tests
// ============================================================================
