use std::time::Duration;

/// Single-period timeline published to the playback pipeline.
///
/// A new value replaces the previous one on every description refresh;
/// published values are never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    /// Presentation duration, `None` when the session does not know it.
    pub duration: Option<Duration>,
    /// Seeking is only possible when the duration is known.
    pub seekable: bool,
    /// Whether the window may still grow. Always `false` for RTSP sources.
    pub dynamic: bool,
    pub live: bool,
}

impl Timeline {
    /// Derive a timeline from the duration reported by the session.
    pub fn single_period(duration: Option<Duration>, live: bool) -> Self {
        Self {
            duration,
            seekable: duration.is_some(),
            dynamic: false,
            live,
        }
    }

    /// Duration in microseconds, the unit RTSP `Range: npt=` values resolve to.
    pub fn duration_us(&self) -> Option<u64> {
        self.duration
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }
}
