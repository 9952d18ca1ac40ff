use event_bus_macros::Event;

/// One rendered log line, published by [`crate::tui::LogQueueLayer`] and
/// drained by the stats task so operator commands and log output never
/// interleave mid-line (SPEC_FULL.md §4.7).
#[derive(Clone, Event)]
pub struct LogLineEvent(pub String);

/// Channel size for the log-line bus, generous enough that a burst of
/// `tracing` events never blocks the emitting task.
pub const LOG_QUEUE_CHANNEL_SIZE: usize = 1000;
