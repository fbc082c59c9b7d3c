//! Audio server seam
//!
//! The session logic only sees the traits and types in this module. The
//! PipeWire implementation lives in [`pipewire_server`]; tests plug in mocks.

pub mod directory;
pub mod pipewire_server;

use std::fmt;

/// State of the connection to the audio server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

/// State of a capture stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Unconnected,
    Creating,
    Ready,
    Failed,
    Terminated,
}

/// Identifies one capture stream for the lifetime of a connection
pub type StreamId = u64;

/// Everything the audio server can tell the session about.
///
/// Backends never call into the session directly; they translate their
/// callbacks into these events and hand them to the event loop. Stream
/// events carry the id of the stream that raised them, since a replaced
/// stream can still have events queued.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Connection(ConnectionState),
    /// One record of a device-info query. `None` marks the end of the list.
    DeviceInfo(Option<DeviceInfo>),
    Stream(StreamId, StreamState),
    FragmentReady(StreamId),
}

/// PCM layout of a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleSpec {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u32,
}

impl SampleSpec {
    /// Same rate and channel count, forced to float32.
    pub fn to_float32(self) -> Self {
        Self {
            format: SampleFormat::Float32Le,
            ..self
        }
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}ch {}Hz", self.format, self.channels, self.rate)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    S16Le,
    S24Le,
    S32Le,
    Float32Le,
    Unknown,
}

impl SampleFormat {
    /// Parse a PipeWire `audio.format` property value
    pub fn from_property(value: &str) -> Self {
        match value {
            "S16LE" | "S16" => Self::S16Le,
            "S24LE" | "S24" => Self::S24Le,
            "S32LE" | "S32" => Self::S32Le,
            "F32LE" | "F32" => Self::Float32Le,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S16Le => "s16le",
            Self::S24Le => "s24le",
            Self::S32Le => "s32le",
            Self::Float32Le => "float32le",
            Self::Unknown => "invalid",
        };
        f.write_str(name)
    }
}

/// Speaker position of each channel, in channel order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelMap {
    positions: Vec<String>,
}

impl ChannelMap {
    /// Parse a PipeWire `audio.position` value such as `FL,FR` or `[ FL FR ]`
    pub fn parse(value: &str) -> Self {
        let positions = value
            .split(|c: char| c == ',' || c.is_whitespace() || c == '[' || c == ']')
            .filter(|p| !p.is_empty())
            .map(|p| p.to_ascii_uppercase())
            .collect();
        Self { positions }
    }

    /// Conventional layout for a channel count
    pub fn default_for(channels: u32) -> Self {
        let positions = match channels {
            1 => vec!["MONO".to_string()],
            2 => vec!["FL".to_string(), "FR".to_string()],
            n => (0..n).map(|i| format!("AUX{}", i)).collect(),
        };
        Self { positions }
    }

    pub fn positions(&self) -> &[String] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

fn long_position_name(short: &str) -> String {
    let name = match short {
        "MONO" => "mono",
        "FL" => "front-left",
        "FR" => "front-right",
        "FC" => "front-center",
        "LFE" => "lfe",
        "SL" => "side-left",
        "SR" => "side-right",
        "RL" => "rear-left",
        "RR" => "rear-right",
        "RC" => "rear-center",
        other => return other.to_ascii_lowercase(),
    };
    name.to_string()
}

impl fmt::Display for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .positions
            .iter()
            .map(|p| long_position_name(p))
            .collect();
        f.write_str(&names.join(","))
    }
}

/// One answer to a device-info query
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    /// Sink node name
    pub name: String,
    /// Capture endpoint mirroring the sink
    pub monitor_source: String,
    pub description: String,
    pub sample_spec: SampleSpec,
    pub channel_map: ChannelMap,
}

/// Failures reported by the audio server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to initialize PipeWire: {0}")]
    Init(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Device query failed: {0}")]
    Query(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("{0}")]
    Peek(String),
}

/// Connection to the audio server
pub trait AudioServer {
    type Stream: CaptureStream;

    /// Start an asynchronous device-info query.
    ///
    /// An empty name means the system default sink. Records arrive later as
    /// [`Event::DeviceInfo`], followed by a `None` end-of-list marker.
    fn query_device_info(&mut self, name: &str) -> Result<(), ServerError>;

    /// Open a record-only stream on a monitor source
    fn open_capture(
        &mut self,
        source: &str,
        spec: &SampleSpec,
        map: &ChannelMap,
    ) -> Result<Self::Stream, ServerError>;
}

/// An open capture stream
pub trait CaptureStream {
    type Fragment<'a>: Fragment
    where
        Self: 'a;

    /// Id carried by this stream's events
    fn id(&self) -> StreamId;

    /// Borrow the next fragment. Dropping the guard releases it.
    fn peek(&mut self) -> Result<Self::Fragment<'_>, ServerError>;
}

/// Scoped read view of one fragment
pub trait Fragment {
    fn bytes(&mut self) -> &[u8];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_spec_display() {
        let spec = SampleSpec {
            format: SampleFormat::S16Le,
            rate: 44100,
            channels: 2,
        };
        assert_eq!(spec.to_string(), "s16le 2ch 44100Hz");
        assert_eq!(spec.to_float32().to_string(), "float32le 2ch 44100Hz");
    }

    #[test]
    fn test_channel_map_parse() {
        assert_eq!(ChannelMap::parse("FL,FR").positions(), ["FL", "FR"]);
        assert_eq!(ChannelMap::parse("[ FL FR LFE ]").len(), 3);
        assert!(ChannelMap::parse("").is_empty());
    }

    #[test]
    fn test_channel_map_display() {
        assert_eq!(ChannelMap::parse("FL,FR").to_string(), "front-left,front-right");
        assert_eq!(ChannelMap::default_for(1).to_string(), "mono");
        assert_eq!(ChannelMap::default_for(3).to_string(), "aux0,aux1,aux2");
    }
}
