//! In-memory audio server for session tests

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;

use crate::audio::{Display, DisplayMode};
use crate::server::{
    AudioServer, CaptureStream, ChannelMap, DeviceInfo, Fragment, SampleFormat, SampleSpec,
    ServerError, StreamId,
};

use super::Session;

#[derive(Default)]
struct ProbeState {
    queries: Vec<String>,
    opened: Vec<(String, SampleSpec, ChannelMap)>,
    fragments: VecDeque<Result<Vec<u8>, String>>,
    releases: usize,
    live_streams: usize,
    drops: Vec<&'static str>,
    fail_query: bool,
    fail_open: bool,
}

/// Shared view into what the mock server and its streams did
#[derive(Clone, Default)]
pub struct Probe {
    state: Rc<RefCell<ProbeState>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragment(&self, samples: &[f32]) {
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.state.borrow_mut().fragments.push_back(Ok(bytes));
    }

    pub fn push_raw_fragment(&self, bytes: Vec<u8>) {
        self.state.borrow_mut().fragments.push_back(Ok(bytes));
    }

    pub fn push_peek_failure(&self, message: &str) {
        self.state
            .borrow_mut()
            .fragments
            .push_back(Err(message.to_string()));
    }

    pub fn fail_queries(&self) {
        self.state.borrow_mut().fail_query = true;
    }

    pub fn fail_opens(&self) {
        self.state.borrow_mut().fail_open = true;
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.borrow().queries.clone()
    }

    pub fn opened(&self) -> Vec<(String, SampleSpec, ChannelMap)> {
        self.state.borrow().opened.clone()
    }

    pub fn releases(&self) -> usize {
        self.state.borrow().releases
    }

    pub fn live_streams(&self) -> usize {
        self.state.borrow().live_streams
    }

    pub fn drops(&self) -> Vec<&'static str> {
        self.state.borrow().drops.clone()
    }
}

pub struct MockServer {
    probe: Probe,
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.probe.state.borrow_mut().drops.push("connection");
    }
}

impl AudioServer for MockServer {
    type Stream = MockStream;

    fn query_device_info(&mut self, name: &str) -> Result<(), ServerError> {
        let mut state = self.probe.state.borrow_mut();
        if state.fail_query {
            return Err(ServerError::Query("connection lost".to_string()));
        }
        state.queries.push(name.to_string());
        Ok(())
    }

    fn open_capture(
        &mut self,
        source: &str,
        spec: &SampleSpec,
        map: &ChannelMap,
    ) -> Result<MockStream, ServerError> {
        let mut state = self.probe.state.borrow_mut();
        if state.fail_open {
            return Err(ServerError::Stream("no such target".to_string()));
        }
        state.opened.push((source.to_string(), *spec, map.clone()));
        state.live_streams += 1;
        Ok(MockStream {
            id: state.opened.len() as StreamId,
            probe: self.probe.clone(),
        })
    }
}

/// Streams are numbered from 1 in the order they were opened
pub struct MockStream {
    id: StreamId,
    probe: Probe,
}

impl Drop for MockStream {
    fn drop(&mut self) {
        let mut state = self.probe.state.borrow_mut();
        state.live_streams -= 1;
        state.drops.push("stream");
    }
}

impl CaptureStream for MockStream {
    type Fragment<'a>
        = MockFragment
    where
        Self: 'a;

    fn id(&self) -> StreamId {
        self.id
    }

    fn peek(&mut self) -> Result<MockFragment, ServerError> {
        let next = self.probe.state.borrow_mut().fragments.pop_front();
        match next {
            Some(Ok(bytes)) => Ok(MockFragment {
                bytes,
                probe: self.probe.clone(),
            }),
            Some(Err(message)) => Err(ServerError::Peek(message)),
            None => Err(ServerError::Peek("no data".to_string())),
        }
    }
}

pub struct MockFragment {
    bytes: Vec<u8>,
    probe: Probe,
}

impl Fragment for MockFragment {
    fn bytes(&mut self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for MockFragment {
    fn drop(&mut self) {
        self.probe.state.borrow_mut().releases += 1;
    }
}

pub fn session(probe: &Probe, mode: DisplayMode) -> Session<MockServer, Vec<u8>> {
    session_with_writer(probe, mode, "", Vec::new())
}

pub fn session_for_device(
    probe: &Probe,
    mode: DisplayMode,
    device: &str,
) -> Session<MockServer, Vec<u8>> {
    session_with_writer(probe, mode, device, Vec::new())
}

pub fn session_with_writer<W: Write>(
    probe: &Probe,
    mode: DisplayMode,
    device: &str,
    out: W,
) -> Session<MockServer, W> {
    let server = MockServer {
        probe: probe.clone(),
    };
    Session::new(server, device, Display::new(mode, out))
}

/// Output whose reader has gone away
pub struct ClosedPipe;

impl Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

pub fn device_info(sink: &str, rate: u32, channels: u32) -> DeviceInfo {
    DeviceInfo {
        name: sink.to_string(),
        monitor_source: format!("{}.monitor", sink),
        description: format!("{} description", sink),
        sample_spec: SampleSpec {
            format: SampleFormat::S16Le,
            rate,
            channels,
        },
        channel_map: ChannelMap::default_for(channels),
    }
}

pub fn output(session: &Session<MockServer, Vec<u8>>) -> String {
    String::from_utf8(session.display().writer().clone()).unwrap_or_default()
}
