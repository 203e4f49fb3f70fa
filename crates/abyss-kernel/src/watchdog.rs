//! [`LinkWatchdog`] – per-stream liveness of the vehicle link.
//!
//! The operator station calls [`LinkWatchdog::heartbeat`] whenever a valid
//! sensor packet or a complete camera frame arrives.  A stream is
//! [`StreamHealth::Stalled`] once it has been silent for longer than its
//! deadline.  Since UDP gives no connection state, this is the only way the
//! station notices the vehicle has gone quiet.
//!
//! [`LinkWatchdog::poll_transitions`] reports each stream only when its
//! health changed, so a supervisor can raise one alert per outage instead of
//! one per tick.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Default silence tolerated before a stream counts as stalled.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(2);

/// Inbound streams the watchdog tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStream {
    Telemetry,
    Imagery,
}

impl LinkStream {
    pub const ALL: [LinkStream; 2] = [LinkStream::Telemetry, LinkStream::Imagery];

    pub fn as_str(self) -> &'static str {
        match self {
            LinkStream::Telemetry => "telemetry",
            LinkStream::Imagery => "imagery",
        }
    }
}

impl fmt::Display for LinkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    Healthy,
    Stalled,
}

struct StreamEntry {
    last_heartbeat: Instant,
    deadline: Duration,
    reported: StreamHealth,
}

impl StreamEntry {
    fn health_at(&self, now: Instant) -> StreamHealth {
        if now.saturating_duration_since(self.last_heartbeat) <= self.deadline {
            StreamHealth::Healthy
        } else {
            StreamHealth::Stalled
        }
    }
}

/// Tracks heartbeats of the telemetry and imagery streams.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use abyss_kernel::watchdog::{LinkStream, LinkWatchdog, StreamHealth};
///
/// let mut wd = LinkWatchdog::new(Duration::from_secs(2));
/// wd.heartbeat(LinkStream::Telemetry);
/// assert_eq!(wd.health(LinkStream::Telemetry), StreamHealth::Healthy);
/// ```
pub struct LinkWatchdog {
    streams: HashMap<LinkStream, StreamEntry>,
}

impl Default for LinkWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_DEADLINE)
    }
}

impl LinkWatchdog {
    /// Track every [`LinkStream`] with the same `deadline`.  Streams start
    /// healthy, as if a heartbeat had just been received.
    pub fn new(deadline: Duration) -> Self {
        Self::starting_at(deadline, Instant::now())
    }

    fn starting_at(deadline: Duration, now: Instant) -> Self {
        let streams = LinkStream::ALL
            .into_iter()
            .map(|s| {
                (
                    s,
                    StreamEntry {
                        last_heartbeat: now,
                        deadline,
                        reported: StreamHealth::Healthy,
                    },
                )
            })
            .collect();
        Self { streams }
    }

    /// Override the deadline of one stream.
    pub fn set_deadline(&mut self, stream: LinkStream, deadline: Duration) {
        if let Some(entry) = self.streams.get_mut(&stream) {
            entry.deadline = deadline;
        }
    }

    /// Record traffic on `stream`.
    pub fn heartbeat(&mut self, stream: LinkStream) {
        self.heartbeat_at(stream, Instant::now());
    }

    fn heartbeat_at(&mut self, stream: LinkStream, now: Instant) {
        if let Some(entry) = self.streams.get_mut(&stream) {
            entry.last_heartbeat = now;
        }
    }

    pub fn health(&self, stream: LinkStream) -> StreamHealth {
        self.health_at(stream, Instant::now())
    }

    fn health_at(&self, stream: LinkStream, now: Instant) -> StreamHealth {
        self.streams
            .get(&stream)
            .map_or(StreamHealth::Stalled, |e| e.health_at(now))
    }

    /// Streams currently past their deadline, in [`LinkStream::ALL`] order.
    pub fn stalled(&self) -> Vec<LinkStream> {
        self.stalled_at(Instant::now())
    }

    fn stalled_at(&self, now: Instant) -> Vec<LinkStream> {
        LinkStream::ALL
            .into_iter()
            .filter(|s| self.health_at(*s, now) == StreamHealth::Stalled)
            .collect()
    }

    /// Streams whose health differs from the last poll, with their new
    /// health.
    pub fn poll_transitions(&mut self) -> Vec<(LinkStream, StreamHealth)> {
        self.poll_transitions_at(Instant::now())
    }

    fn poll_transitions_at(&mut self, now: Instant) -> Vec<(LinkStream, StreamHealth)> {
        let mut changed = Vec::new();
        for stream in LinkStream::ALL {
            let Some(entry) = self.streams.get_mut(&stream) else {
                continue;
            };
            let health = entry.health_at(now);
            if health != entry.reported {
                entry.reported = health;
                changed.push((stream, health));
            }
        }
        changed
    }
}
