//! Engine facade
//!
//! Owns one `ParameterBus` and every component that writes through it or
//! reads from the host:
//! - Automation scheduler and parameter recorder (advanced by `tick`)
//! - MIDI mapper, macro engine and direct control (immediate writes)
//! - Level, spectrum, feedback and latency analyzers (read-only snapshots)
//!
//! Time is measured from engine construction with a monotonic clock.
//! `TickDriver` runs the engine on a dedicated thread.

pub mod driver;
pub mod io;

pub use driver::{DriverCommand, TickDriver};
pub use io::{load_wav, write_wav};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;

use crate::analysis::{
    FeedbackDetector, FeedbackReport, LatencyEstimator, LatencyReport, LevelMeter, LevelReport,
    SpectrumAnalyzer, SpectrumReport, WindowFunction,
};
use crate::automation::{
    AutomationRequest, AutomationScheduler, CancelReason, Curve, MorphRequest, ParameterRecorder,
    Recording, RecordingId, RunId, RunSnapshot, StartOutcome, TickSummary,
};
use crate::config::EngineConfig;
use crate::control::{
    DirectControl, Macro, MacroEngine, MacroId, MacroReport, MacroTargetSpec, MappingId,
    MappingRequest, MidiDispatch, MidiMapper, MidiMapping, RandomizeReport,
};
use crate::error::Result;
use crate::host::{
    NodeId, ParameterBus, ParameterInfo, ParameterRef, PluginHost, PluginId, Range, RoutingGraph,
};

/// Automation and analysis engine over one plugin host
pub struct Engine {
    config: EngineConfig,
    bus: Arc<ParameterBus>,
    routing: Arc<dyn RoutingGraph>,
    scheduler: AutomationScheduler,
    recorder: ParameterRecorder,
    midi: MidiMapper,
    macros: MacroEngine,
    direct: DirectControl,
    meter: LevelMeter,
    spectrum: SpectrumAnalyzer,
    feedback: FeedbackDetector,
    latency: LatencyEstimator,
    epoch: Instant,
}

impl Engine {
    /// Create an engine over a host and its routing graph
    ///
    /// # Errors
    /// `Config` if the configuration does not validate.
    pub fn new(
        host: Arc<dyn PluginHost>,
        routing: Arc<dyn RoutingGraph>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(ParameterBus::new(host));

        info!(
            "[ENGINE] started at {} Hz, tick every {} ms",
            bus.host().sample_rate(),
            config.scheduler.tick_interval_ms
        );

        Ok(Self {
            scheduler: AutomationScheduler::new(bus.clone(), config.scheduler.clone()),
            recorder: ParameterRecorder::new(bus.clone()),
            midi: MidiMapper::new(bus.clone()),
            macros: MacroEngine::new(bus.clone()),
            direct: DirectControl::new(bus.clone()),
            meter: LevelMeter::new(config.analysis.clone()),
            spectrum: SpectrumAnalyzer::new(config.analysis.floor_db),
            feedback: FeedbackDetector::new(config.feedback.clone()),
            latency: LatencyEstimator::new(config.latency.clone()),
            epoch: Instant::now(),
            routing,
            bus,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<ParameterBus> {
        &self.bus
    }

    /// Time since the engine was created
    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn scheduler(&self) -> &AutomationScheduler {
        &self.scheduler
    }

    pub fn recorder(&self) -> &ParameterRecorder {
        &self.recorder
    }

    pub fn midi(&self) -> &MidiMapper {
        &self.midi
    }

    pub fn macros(&self) -> &MacroEngine {
        &self.macros
    }

    pub fn feedback_detector(&self) -> &FeedbackDetector {
        &self.feedback
    }

    // ========================================================================
    // Automation
    // ========================================================================

    pub fn start_automation(&self, request: AutomationRequest) -> Result<StartOutcome> {
        self.scheduler.start(request, self.now())
    }

    pub fn start_morph(
        &self,
        plugin_id: PluginId,
        target_state: BTreeMap<u32, f64>,
        duration: Duration,
    ) -> Result<StartOutcome> {
        let request = MorphRequest::new(plugin_id, target_state, duration);
        self.scheduler.start_morph(request, self.now())
    }

    pub fn cancel_automation(&self, run_id: RunId) -> Result<RunSnapshot> {
        self.scheduler.cancel(run_id)
    }

    pub fn automation_status(&self, run_id: RunId) -> Result<RunSnapshot> {
        self.scheduler.status(run_id)
    }

    pub fn list_automations(&self) -> Vec<RunSnapshot> {
        self.scheduler.list()
    }

    /// Values a curve would write at evenly spaced progress points
    pub fn preview_curve(&self, curve: &Curve, range: &Range) -> Result<Vec<f64>> {
        self.scheduler.preview_curve(curve, range)
    }

    /// Advance automation and recordings to the current time
    pub fn tick(&self) -> TickSummary {
        self.tick_at(self.now())
    }

    /// Advance automation and recordings to an explicit time
    pub fn tick_at(&self, now: Duration) -> TickSummary {
        let summary = self.scheduler.tick(now);
        self.recorder.sample(now);
        summary
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub fn start_recording(&self, params: &[ParameterRef], duration: Duration) -> Result<RecordingId> {
        self.recorder.start(params, duration, self.now())
    }

    pub fn stop_recording(&self, id: RecordingId) -> Result<Recording> {
        self.recorder.stop(id)
    }

    pub fn get_recording(&self, id: RecordingId) -> Result<Recording> {
        self.recorder.get(id)
    }

    // ========================================================================
    // MIDI, macros and direct control
    // ========================================================================

    pub fn map_midi_cc(&self, request: MappingRequest) -> Result<MidiMapping> {
        self.midi.map(request)
    }

    pub fn unmap_midi_cc(&self, id: MappingId) -> Result<MidiMapping> {
        self.midi.remove(id)
    }

    pub fn on_midi_cc(&self, channel: u8, cc_number: u8, value: u8) -> MidiDispatch {
        self.midi.on_midi_cc(channel, cc_number, value)
    }

    pub fn on_midi_message(&self, bytes: &[u8]) -> Option<MidiDispatch> {
        self.midi.on_midi_message(bytes)
    }

    pub fn create_macro(&self, name: &str, targets: Vec<MacroTargetSpec>) -> Result<Macro> {
        self.macros.create(name, targets)
    }

    pub fn set_macro_value(&self, macro_id: MacroId, value: f64) -> Result<MacroReport> {
        self.macros.set_value(macro_id, value)
    }

    pub fn get_parameter(&self, param: ParameterRef) -> Result<ParameterInfo> {
        self.direct.get(param)
    }

    pub fn set_parameter(&self, param: ParameterRef, value: f64) -> Result<f64> {
        self.direct.set(param, value)
    }

    pub fn list_parameters(&self, plugin_id: PluginId) -> Result<Vec<(u32, ParameterInfo)>> {
        self.direct.list(plugin_id)
    }

    pub fn randomize_parameters(
        &self,
        plugin_id: PluginId,
        amount: f64,
        exclude: &[u32],
        seed: u64,
    ) -> Result<RandomizeReport> {
        self.direct.randomize(plugin_id, amount, exclude, seed)
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    pub fn analyze_levels(&self, tap: &NodeId) -> Result<LevelReport> {
        self.meter.measure_tap(self.bus.host().as_ref(), tap)
    }

    pub fn level_history(&self, tap: &NodeId) -> Vec<LevelReport> {
        self.meter.history(tap)
    }

    /// Spectrum of a tap, falling back to the configured size and window
    pub fn analyze_spectrum(
        &self,
        tap: &NodeId,
        fft_size: Option<usize>,
        window_function: Option<WindowFunction>,
    ) -> Result<SpectrumReport> {
        let fft_size = fft_size.unwrap_or(self.config.analysis.default_fft_size);
        let window_function = window_function.unwrap_or(self.config.analysis.default_window);
        crate::analysis::validate_fft_size(fft_size)?;

        let window = self.bus.host().get_audio_window(tap, fft_size)?;
        self.spectrum.analyze(&window, fft_size, window_function)
    }

    pub fn detect_feedback(&self, sensitivity: Option<f64>) -> Result<FeedbackReport> {
        self.feedback.scan(self.routing.as_ref(), sensitivity)
    }

    pub fn measure_latency(&self, measure_plugins: bool) -> Result<LatencyReport> {
        self.latency
            .measure(self.bus.host().as_ref(), self.routing.as_ref(), measure_plugins)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Cancel every active run and close every recording
    ///
    /// Returns the number of runs cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.scheduler.cancel_all(CancelReason::Shutdown);
        self.recorder.stop_all();
        info!("[ENGINE] shut down, {} runs cancelled", cancelled);
        cancelled
    }
}
