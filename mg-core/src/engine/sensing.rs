//! One pass of the sensing cycle
//!
//! capture → recognize → extract digits → log → safety. Capture and
//! recognition run without touching the coordinator; only a cutoff enters
//! its exclusion domain.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::coordinator::EmergencyStop;
use crate::engine::readings::ReadingLog;
use crate::engine::safety::SafetyMonitor;
use crate::error::MeterGuardError;
use crate::hw::{DigitReader, FrameSource};

/// What a single cycle did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Recorded { value: f64, tripped: bool },
    CaptureFailed,
    NothingRecognized,
    ReaderFailed,
    /// The value was evaluated but could not be persisted
    LogFailed { value: f64, tripped: bool },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Recorded { .. } => "recorded",
            CycleOutcome::CaptureFailed => "capture_failed",
            CycleOutcome::NothingRecognized => "nothing_recognized",
            CycleOutcome::ReaderFailed => "reader_failed",
            CycleOutcome::LogFailed { .. } => "log_failed",
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            CycleOutcome::Recorded { value, .. } | CycleOutcome::LogFailed { value, .. } => {
                Some(*value)
            }
            _ => None,
        }
    }

    pub fn tripped(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Recorded { tripped: true, .. } | CycleOutcome::LogFailed { tripped: true, .. }
        )
    }

    pub fn to_info(&self) -> mg_protocol::CycleInfo {
        mg_protocol::CycleInfo {
            outcome: self.label().to_string(),
            value_kwh: self.value(),
            tripped: self.tripped(),
        }
    }
}

/// Keep only ASCII digits and parse them as kWh
///
/// `"12O3kWh "` reads as 123. Returns `None` when nothing numeric remains.
/// A digit run too long for `f64` saturates to `f64::MAX` so it still
/// reaches the safety check.
pub fn extract_digits(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let value = digits.parse::<f64>().ok()?;
    Some(if value.is_finite() { value } else { f64::MAX })
}

pub struct SensingCycle {
    source: Box<dyn FrameSource>,
    reader: Box<dyn DigitReader>,
    log: Arc<ReadingLog>,
    monitor: SafetyMonitor,
    cutoff: Arc<dyn EmergencyStop>,
    /// Scheduled and on-demand cycles share one frame file
    running: Mutex<()>,
}

impl SensingCycle {
    pub fn new(
        source: Box<dyn FrameSource>,
        reader: Box<dyn DigitReader>,
        log: Arc<ReadingLog>,
        monitor: SafetyMonitor,
        cutoff: Arc<dyn EmergencyStop>,
    ) -> Self {
        Self {
            source,
            reader,
            log,
            monitor,
            cutoff,
            running: Mutex::new(()),
        }
    }

    pub fn monitor(&self) -> &SafetyMonitor {
        &self.monitor
    }

    pub fn log(&self) -> &Arc<ReadingLog> {
        &self.log
    }

    /// Blocking; run off the async executor
    pub fn run_once(&self) -> CycleOutcome {
        let _running = self.running.lock();

        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame capture failed: {}", e);
                return CycleOutcome::CaptureFailed;
            }
        };
        // Readings are stamped when the frame was taken, not when OCR finished
        let captured_at = Utc::now();

        let raw = match self.reader.recognize(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Digit recognition failed: {}", e);
                return CycleOutcome::ReaderFailed;
            }
        };

        let value = match extract_digits(&raw) {
            Some(value) => value,
            None => {
                warn!(raw = %raw.trim(), "{}", MeterGuardError::RecognitionEmpty);
                return CycleOutcome::NothingRecognized;
            }
        };

        let logged = match self.log.append_at(captured_at, value) {
            Ok(reading) => {
                debug!(value, timestamp = %reading.timestamp, "Reading recorded");
                true
            }
            Err(e) => {
                warn!(value, "Failed to record reading: {}", e);
                false
            }
        };

        let tripped = self.monitor.evaluate(value, self.cutoff.as_ref());
        info!(value, tripped, "Sensing cycle complete");

        if logged {
            CycleOutcome::Recorded { value, tripped }
        } else {
            CycleOutcome::LogFailed { value, tripped }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ActuationReport, MemoryReadingStore};
    use crate::hw::{Frame, MockDigitReader, MockFrameSource};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStop(AtomicUsize);

    impl EmergencyStop for CountingStop {
        fn emergency_all_off(&self) -> ActuationReport {
            self.0.fetch_add(1, Ordering::SeqCst);
            ActuationReport::default()
        }
    }

    fn source_ok() -> MockFrameSource {
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .returning(|| Ok(Frame { path: PathBuf::from("/tmp/frame.jpg") }));
        source
    }

    fn reader_returning(text: &'static str) -> MockDigitReader {
        let mut reader = MockDigitReader::new();
        reader.expect_recognize().returning(move |_| Ok(text.to_string()));
        reader
    }

    fn cycle(
        source: MockFrameSource,
        reader: MockDigitReader,
        store: MemoryReadingStore,
        stop: Arc<CountingStop>,
    ) -> SensingCycle {
        let log = Arc::new(ReadingLog::open(Box::new(store), 20).unwrap());
        SensingCycle::new(
            Box::new(source),
            Box::new(reader),
            log,
            SafetyMonitor::new(5000.0),
            stop,
        )
    }

    #[test]
    fn test_extract_digits() {
        assert_eq!(extract_digits("12O3kWh "), Some(123.0));
        assert_eq!(extract_digits("004512\n"), Some(4512.0));
        assert_eq!(extract_digits(""), None);
        assert_eq!(extract_digits("  "), None);
        assert_eq!(extract_digits("kWh"), None);
        assert_eq!(extract_digits(&"9".repeat(400)), Some(f64::MAX));
    }

    #[test]
    fn test_oversized_reading_still_trips_cutoff() {
        let mut reader = MockDigitReader::new();
        reader.expect_recognize().returning(|_| Ok(format!("{} kWh", "9".repeat(400))));

        let store = MemoryReadingStore::new();
        let stop = Arc::new(CountingStop::default());
        let outcome = cycle(source_ok(), reader, store.clone(), stop.clone()).run_once();

        assert_eq!(outcome, CycleOutcome::Recorded { value: f64::MAX, tripped: true });
        assert_eq!(store.all()[0].value, f64::MAX);
        assert_eq!(stop.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reading_is_stamped_at_capture() {
        let recognized_at = Arc::new(Mutex::new(None));
        let seen = recognized_at.clone();
        let mut reader = MockDigitReader::new();
        reader.expect_recognize().returning(move |_| {
            *seen.lock() = Some(Utc::now());
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok("4512".to_string())
        });

        let store = MemoryReadingStore::new();
        let stop = Arc::new(CountingStop::default());
        let outcome = cycle(source_ok(), reader, store.clone(), stop).run_once();
        assert_eq!(outcome, CycleOutcome::Recorded { value: 4512.0, tripped: false });

        let recognized_at = (*recognized_at.lock()).unwrap();
        assert!(store.all()[0].timestamp <= recognized_at);
    }

    #[test]
    fn test_recorded_below_threshold() {
        let store = MemoryReadingStore::new();
        let stop = Arc::new(CountingStop::default());
        let outcome = cycle(source_ok(), reader_returning("4512"), store.clone(), stop.clone()).run_once();

        assert_eq!(outcome, CycleOutcome::Recorded { value: 4512.0, tripped: false });
        assert_eq!(store.all().len(), 1);
        assert_eq!(stop.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exceeding_value_trips_cutoff() {
        let store = MemoryReadingStore::new();
        let stop = Arc::new(CountingStop::default());
        let outcome = cycle(source_ok(), reader_returning("5001"), store.clone(), stop.clone()).run_once();

        assert!(outcome.tripped());
        assert_eq!(store.all()[0].value, 5001.0);
        assert_eq!(stop.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capture_failure_has_no_side_effects() {
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .returning(|| Err(MeterGuardError::CaptureFailure("no device".into())));
        let mut reader = MockDigitReader::new();
        reader.expect_recognize().never();

        let store = MemoryReadingStore::new();
        let stop = Arc::new(CountingStop::default());
        let outcome = cycle(source, reader, store.clone(), stop.clone()).run_once();

        assert_eq!(outcome, CycleOutcome::CaptureFailed);
        assert!(store.all().is_empty());
        assert_eq!(stop.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blank_recognition_skips_log_and_safety() {
        let store = MemoryReadingStore::new();
        let stop = Arc::new(CountingStop::default());
        let outcome = cycle(source_ok(), reader_returning("  "), store.clone(), stop.clone()).run_once();

        assert_eq!(outcome, CycleOutcome::NothingRecognized);
        assert!(store.all().is_empty());
        assert_eq!(stop.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reader_error_aborts_cycle() {
        let mut reader = MockDigitReader::new();
        reader
            .expect_recognize()
            .returning(|_| Err(MeterGuardError::Reader("tesseract crashed".into())));
        let store = MemoryReadingStore::new();
        let outcome = cycle(source_ok(), reader, store.clone(), Arc::new(CountingStop::default())).run_once();

        assert_eq!(outcome, CycleOutcome::ReaderFailed);
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_log_failure_still_evaluates_safety() {
        let store = MemoryReadingStore::new();
        store.set_fail_appends(true);
        let stop = Arc::new(CountingStop::default());
        let outcome = cycle(source_ok(), reader_returning("9999"), store, stop.clone()).run_once();

        assert_eq!(outcome, CycleOutcome::LogFailed { value: 9999.0, tripped: true });
        assert_eq!(stop.0.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.to_info().outcome, "log_failed");
    }
}
