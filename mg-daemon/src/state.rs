//! Daemon-wide shared state
//!
//! Built once at startup and shared between the sensing loop and every
//! client connection.

use std::sync::Arc;
use tracing::info;

use mg_core::{
    snapshot_info, ActuationGateway, CommandFrameSource, JsonRegistryStore, JsonlReadingStore,
    ReadingLog, SafetyMonitor, SensingCycle, Settings, StateCoordinator, SysfsGpio,
    TesseractReader,
};
use mg_protocol::{SafetyInfo, Snapshot};

pub struct DaemonState {
    pub coordinator: Arc<StateCoordinator>,
    pub cycle: Arc<SensingCycle>,
    /// Readings returned with each snapshot
    pub snapshot_readings: usize,
}

impl DaemonState {
    pub fn new(
        coordinator: Arc<StateCoordinator>,
        cycle: Arc<SensingCycle>,
        snapshot_readings: usize,
    ) -> Self {
        Self {
            coordinator,
            cycle,
            snapshot_readings,
        }
    }

    /// Wire the production collaborators described by `settings`
    pub fn from_settings(settings: &Settings) -> mg_core::Result<Self> {
        let gateway = ActuationGateway::new(
            Box::new(SysfsGpio::new(&settings.relays.gpio_base)),
            settings.relays.active_low,
        );
        let coordinator = Arc::new(StateCoordinator::open(
            Box::new(JsonRegistryStore::new(settings.registry_path())),
            gateway,
            &settings.relays.pins,
        )?);

        let log = Arc::new(ReadingLog::open(
            Box::new(JsonlReadingStore::new(settings.readings_path())),
            settings.storage.snapshot_readings,
        )?);

        let sensing = &settings.sensing;
        let source = CommandFrameSource::new(
            sensing.capture_command.clone(),
            sensing.capture_device.clone(),
            sensing.frame_width,
            sensing.frame_height,
            settings.frame_path(),
        );
        let reader = TesseractReader::new(sensing.tesseract_command.clone(), sensing.digits_only);

        let cycle = Arc::new(SensingCycle::new(
            Box::new(source),
            Box::new(reader),
            log,
            SafetyMonitor::new(settings.safety.threshold_kwh),
            coordinator.clone(),
        ));

        info!(
            "STARTUP: {} relays, threshold {} kWh, active_low={}",
            coordinator.snapshot().relays().count(),
            settings.safety.threshold_kwh,
            settings.relays.active_low
        );

        Ok(Self::new(coordinator, cycle, settings.storage.snapshot_readings))
    }

    pub fn snapshot(&self) -> Snapshot {
        let readings = self.cycle.log().recent(self.snapshot_readings);
        snapshot_info(&self.coordinator.snapshot(), &readings)
    }

    pub fn safety_status(&self) -> SafetyInfo {
        let latest = self.cycle.log().latest();
        self.cycle.monitor().status(latest.as_ref())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use mg_core::{
        Actuator, DigitReader, Frame, FrameSource, Level, MemoryReadingStore, MemoryRegistryStore,
        Pin,
    };
    use std::path::PathBuf;

    pub struct NullActuator;

    impl Actuator for NullActuator {
        fn set_level(&mut self, _pin: Pin, _level: Level) -> mg_core::Result<()> {
            Ok(())
        }
    }

    pub struct StillFrame;

    impl FrameSource for StillFrame {
        fn capture(&self) -> mg_core::Result<Frame> {
            Ok(Frame { path: PathBuf::from("/tmp/meter.jpg") })
        }
    }

    pub struct FixedText(pub &'static str);

    impl DigitReader for FixedText {
        fn recognize(&self, _frame: &Frame) -> mg_core::Result<String> {
            Ok(self.0.to_string())
        }
    }

    /// Four relays, in-memory stores, a reader that always sees `text`
    pub fn state_reading(text: &'static str) -> Arc<DaemonState> {
        let gateway = ActuationGateway::new(Box::new(NullActuator), true);
        let coordinator = Arc::new(
            StateCoordinator::open(Box::new(MemoryRegistryStore::new()), gateway, &[17, 27, 22, 23])
                .unwrap(),
        );
        let log = Arc::new(ReadingLog::open(Box::new(MemoryReadingStore::new()), 20).unwrap());
        let cycle = Arc::new(SensingCycle::new(
            Box::new(StillFrame),
            Box::new(FixedText(text)),
            log,
            SafetyMonitor::new(5000.0),
            coordinator.clone(),
        ));
        Arc::new(DaemonState::new(coordinator, cycle, 20))
    }
}
