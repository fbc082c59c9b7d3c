//! Capture stream lifecycle and fragment processing

use std::io::Write;

use log::{debug, error, info};

use crate::audio::{first_sample_magnitude, Flow};
use crate::server::{AudioServer, CaptureStream, ChannelMap, Fragment, SampleSpec, StreamState};

use super::{Session, EXIT_FAILURE};

impl<S: AudioServer, W: Write> Session<S, W> {
    /// Open a float32 capture stream on `source`, replacing any current one
    pub(super) fn open_capture(
        &mut self,
        source: String,
        description: String,
        spec: &SampleSpec,
        map: &ChannelMap,
    ) -> Flow {
        self.device_name = source;
        self.device_description = description;

        let capture_spec = spec.to_float32();
        info!("Using sample format: {}", capture_spec);
        info!("Using channel map: {}", map);

        // Only one stream per session: release the old one before opening
        if let Some(previous) = self.stream.take() {
            debug!("Releasing previous capture stream");
            drop(previous);
        }

        match self
            .connection
            .open_capture(&self.device_name, &capture_spec, map)
        {
            Ok(stream) => {
                self.stream = Some(stream);
                Flow::Continue
            }
            Err(e) => {
                error!("Failed to open capture on {}: {}", self.device_name, e);
                Flow::Quit(EXIT_FAILURE)
            }
        }
    }

    pub(super) fn on_stream_state(&mut self, state: StreamState) -> Flow {
        match state {
            StreamState::Unconnected | StreamState::Creating | StreamState::Terminated => {
                debug!("Stream state: {:?}", state);
                Flow::Continue
            }
            StreamState::Ready => {
                debug!("Capturing from {}", self.device_name);
                Flow::Continue
            }
            StreamState::Failed => {
                error!("Capture stream on {} failed", self.device_name);
                Flow::Quit(EXIT_FAILURE)
            }
        }
    }

    /// Read one fragment and render its loudness.
    ///
    /// The fragment guard is dropped on every path out of this function,
    /// which hands the fragment back to the server exactly once.
    pub(super) fn on_fragment_ready(&mut self) -> Flow {
        let Some(stream) = self.stream.as_mut() else {
            return Flow::Continue;
        };

        let mut fragment = match stream.peek() {
            Ok(fragment) => fragment,
            Err(e) => {
                error!("Failed to read fragment: {}", e);
                return Flow::Continue;
            }
        };

        let Some(loudness) = first_sample_magnitude(fragment.bytes()) else {
            return Flow::Continue;
        };

        match self.display.render(loudness) {
            Ok(flow) => flow,
            Err(e) => {
                error!("Failed to write reading: {}", e);
                Flow::Quit(EXIT_FAILURE)
            }
        }
    }
}
