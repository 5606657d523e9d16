//! Server-initiated ping ticker.
//!
//! ```text
//! Heartbeat task ── every interval ──► FrameSink::ping ──► writer task
//! ```
//!
//! The read loop keeps a deadline of twice the interval and pushes it out on
//! every pong; the ticker only produces pings.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::sink::FrameSink;

// ============================================================================
// Heartbeat
// ============================================================================

/// Running ping ticker for one connection.
///
/// Stops on [`stop`](Self::stop), on drop, or when the connection's writer
/// has gone away.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Starts pinging through `sink` every `interval`.
    ///
    /// The first ping is sent one interval after start.
    #[must_use]
    pub fn spawn(interval: Duration, sink: FrameSink) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            debug!(?interval, "Heartbeat started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        trace!("Heartbeat ping");
                        if sink.ping().is_err() {
                            debug!("Heartbeat writer closed");
                            break;
                        }
                    }
                }
            }

            debug!("Heartbeat stopped");
        });

        Self {
            interval,
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Returns the ping interval.
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the read deadline window: twice the interval.
    #[inline]
    #[must_use]
    pub fn read_window(&self) -> Duration {
        self.interval * 2
    }

    /// Signals the ticker to stop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Returns `true` once the ticker task has ended.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test(start_paused = true)]
    async fn test_pings_every_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let heartbeat = Heartbeat::spawn(Duration::from_secs(1), FrameSink::from_sender(tx));
        assert_eq!(heartbeat.read_window(), Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(3_500)).await;

        let mut pings = 0;
        while let Ok(message) = rx.try_recv() {
            assert!(matches!(message, Message::Ping(_)));
            pings += 1;
        }
        assert_eq!(pings, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut heartbeat = Heartbeat::spawn(Duration::from_secs(1), FrameSink::from_sender(tx));

        heartbeat.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(heartbeat.is_finished());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_writer_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let heartbeat = Heartbeat::spawn(Duration::from_secs(1), FrameSink::from_sender(tx));
        drop(rx);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(heartbeat.is_finished());
    }
}
