//! Audio server session
//!
//! [`Session`] is the single owned context every event handler works on: the
//! connection, the optional capture stream, the resolved device strings and
//! the display. Events are dispatched by [`Session::handle`]; the handlers
//! live in [`negotiator`] (connection and device info) and [`capture`]
//! (stream state and fragments).

mod capture;
mod negotiator;
#[cfg(test)]
mod testing;

use std::io::Write;

use log::debug;

use crate::audio::{Display, Flow};
use crate::server::{AudioServer, CaptureStream, Event, StreamId};

/// Exit status when the session stops because of a fault
pub const EXIT_FAILURE: i32 = 1;

pub struct Session<S: AudioServer, W: Write> {
    connection: S,
    stream: Option<S::Stream>,
    /// Sink requested on the command line, empty for the default sink
    configured_device: String,
    /// Records received for the outstanding device-info query, if any
    pending_query: Option<usize>,
    /// Monitor source of the last resolved device
    device_name: String,
    device_description: String,
    display: Display<W>,
}

impl<S: AudioServer, W: Write> Session<S, W> {
    pub fn new(connection: S, configured_device: &str, display: Display<W>) -> Self {
        Self {
            connection,
            stream: None,
            configured_device: configured_device.to_string(),
            pending_query: None,
            device_name: String::new(),
            device_description: String::new(),
            display,
        }
    }

    /// Dispatch one event to its handler
    pub fn handle(&mut self, event: Event) -> Flow {
        match event {
            Event::Connection(state) => self.on_connection_state(state),
            Event::DeviceInfo(info) => self.on_device_info(info),
            Event::Stream(id, state) if self.is_current_stream(id) => self.on_stream_state(state),
            Event::FragmentReady(id) if self.is_current_stream(id) => self.on_fragment_ready(),
            Event::Stream(id, _) | Event::FragmentReady(id) => {
                debug!("Dropping event from stream {}, not the current one", id);
                Flow::Continue
            }
        }
    }

    fn is_current_stream(&self, id: StreamId) -> bool {
        self.stream.as_ref().is_some_and(|stream| stream.id() == id)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_description(&self) -> &str {
        &self.device_description
    }

    #[cfg(test)]
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    #[cfg(test)]
    pub fn display(&self) -> &Display<W> {
        &self.display
    }
}

impl<S: AudioServer, W: Write> Drop for Session<S, W> {
    // Fields drop in declaration order after this, so the connection goes
    // right after the stream, then the device strings.
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("Closing capture stream on {}", self.device_name);
            drop(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::server::{ConnectionState, StreamState};

    #[test]
    fn test_full_one_shot_sequence() {
        let probe = Probe::new();
        probe.push_fragment(&[0.15, 0.7]);
        let mut session = session(&probe, crate::audio::DisplayMode::OneShot);

        let events = [
            Event::Connection(ConnectionState::Connecting),
            Event::Connection(ConnectionState::Ready),
            Event::DeviceInfo(Some(device_info("speakers", 48000, 2))),
            Event::DeviceInfo(None),
            Event::Stream(1, StreamState::Creating),
            Event::Stream(1, StreamState::Ready),
        ];
        for event in events {
            assert_eq!(session.handle(event), Flow::Continue);
        }

        assert_eq!(session.handle(Event::FragmentReady(1)), Flow::Quit(0));
        assert_eq!(output(&session), "0.15000\n");
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn test_teardown_releases_stream_before_connection() {
        let probe = Probe::new();
        let mut session = session(&probe, crate::audio::DisplayMode::BarGraph);
        session.handle(Event::Connection(ConnectionState::Ready));
        session.handle(Event::DeviceInfo(Some(device_info("speakers", 48000, 2))));
        assert_eq!(probe.live_streams(), 1);

        drop(session);
        assert_eq!(probe.live_streams(), 0);
        assert_eq!(probe.drops(), vec!["stream", "connection"]);
    }

    #[test]
    fn test_events_from_replaced_stream_are_dropped() {
        let probe = Probe::new();
        probe.push_fragment(&[0.01]);
        let mut session = session(&probe, crate::audio::DisplayMode::BarGraph);
        session.handle(Event::DeviceInfo(Some(device_info("speakers", 48000, 2))));
        session.handle(Event::DeviceInfo(Some(device_info("headset", 16000, 1))));

        assert_eq!(session.handle(Event::Stream(1, StreamState::Failed)), Flow::Continue);
        assert_eq!(session.handle(Event::FragmentReady(1)), Flow::Continue);
        assert_eq!(probe.releases(), 0);
        assert_eq!(output(&session), "");

        assert_eq!(session.handle(Event::FragmentReady(2)), Flow::Continue);
        assert_eq!(probe.releases(), 1);
        assert_eq!(session.handle(Event::Stream(2, StreamState::Failed)), Flow::Quit(1));
    }

    #[test]
    fn test_teardown_without_stream() {
        let probe = Probe::new();
        let session = session(&probe, crate::audio::DisplayMode::OneShot);
        drop(session);
        assert_eq!(probe.drops(), vec!["connection"]);
    }
}
