//! Lock-free counters for observability.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

macro_rules! counters {
    ($($name:ident),* $(,)?) => {
        /// Counters bumped by the capture path and the session actor.
        #[derive(Debug, Default)]
        pub struct EngineDiagnostics {
            $(pub $name: AtomicUsize,)*
        }

        /// Point-in-time copy of [`EngineDiagnostics`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct DiagnosticsSnapshot {
            $(pub $name: usize,)*
        }

        impl EngineDiagnostics {
            pub fn reset(&self) {
                $(self.$name.store(0, Ordering::Relaxed);)*
            }

            pub fn snapshot(&self) -> DiagnosticsSnapshot {
                DiagnosticsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters!(
    chunks_in,
    canonical_bytes,
    conversion_errors,
    capture_errors,
    speech_started,
    speech_ended,
    wake_checks,
    wake_hits,
    wake_errors,
    sessions_opened,
    transcripts,
    commands_matched,
    actions_failed,
    conduit_dropped,
    recognizer_errors,
);

impl EngineDiagnostics {
    /// Increment one counter.
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
