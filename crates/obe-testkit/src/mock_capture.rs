// A scripted `CaptureAdapter`: replays a fixed sequence of events, then
// reports the adapter stopped. Used to drive `InputStage` deterministically
// in integration tests without touching any capture hardware.

use std::collections::VecDeque;
use std::sync::Mutex;

use obe_core::descriptors::InputStreamDescriptor;
use obe_core::error::PipelineError;
use obe_core::stages::input::{CaptureAdapter, CaptureEvent};

pub struct ScriptedCaptureAdapter {
    descriptors: Vec<InputStreamDescriptor>,
    events: Mutex<VecDeque<CaptureEvent>>,
}

impl ScriptedCaptureAdapter {
    pub fn new(descriptors: Vec<InputStreamDescriptor>, events: Vec<CaptureEvent>) -> Self {
        Self { descriptors, events: Mutex::new(events.into()) }
    }
}

impl CaptureAdapter for ScriptedCaptureAdapter {
    fn probe(&mut self) -> Result<Vec<InputStreamDescriptor>, PipelineError> {
        Ok(self.descriptors.clone())
    }

    fn next_event(&mut self) -> Option<CaptureEvent> {
        self.events.lock().unwrap().pop_front()
    }
}
