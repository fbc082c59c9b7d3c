//! Sink lookup for device-info queries
//!
//! Mirrors the PipeWire graph's audio sinks as the registry announces and
//! removes them, plus the default sink named by the `default` metadata
//! object. Queries are answered from this snapshot.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{ChannelMap, DeviceInfo, SampleFormat, SampleSpec};

/// Metadata key holding the default sink
pub const DEFAULT_SINK_KEY: &str = "default.audio.sink";

const FALLBACK_RATE: u32 = 48000;
const FALLBACK_CHANNELS: u32 = 2;

/// An `Audio/Sink` node.
///
/// The registry announces only a filtered set of properties, so the audio
/// layout is filled in later from the bound node's own properties and its
/// negotiated `Format` param.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SinkNode {
    pub name: String,
    pub description: Option<String>,
    pub format: Option<String>,
    pub rate: Option<u32>,
    pub channels: Option<u32>,
    pub position: Option<String>,
}

/// Audio layout taken from a node's `Format` param
#[derive(Clone, Debug, PartialEq)]
pub struct NegotiatedFormat {
    pub format: Option<String>,
    pub rate: u32,
    pub channels: u32,
    pub position: Option<String>,
}

impl SinkNode {
    /// Apply one property from the node's info. Unknown keys are ignored.
    pub fn apply_property(&mut self, key: &str, value: &str) {
        match key {
            "node.description" => self.description = Some(value.to_string()),
            "audio.format" => self.format = Some(value.to_string()),
            "audio.rate" => self.rate = value.parse().ok().or(self.rate),
            "audio.channels" => self.channels = value.parse().ok().or(self.channels),
            "audio.position" => self.position = Some(value.to_string()),
            _ => {}
        }
    }

    /// Apply a negotiated format. It wins over properties once known.
    pub fn apply_format(&mut self, negotiated: NegotiatedFormat) {
        if negotiated.format.is_some() {
            self.format = negotiated.format;
        }
        if negotiated.rate > 0 {
            self.rate = Some(negotiated.rate);
        }
        if negotiated.channels > 0 {
            self.channels = Some(negotiated.channels);
        }
        if negotiated.position.is_some() {
            self.position = negotiated.position;
        }
    }

    fn device_info(&self) -> DeviceInfo {
        let channels = self.channels.unwrap_or(FALLBACK_CHANNELS);
        let channel_map = self
            .position
            .as_deref()
            .map(ChannelMap::parse)
            .filter(|map| map.len() == channels as usize)
            .unwrap_or_else(|| ChannelMap::default_for(channels));

        DeviceInfo {
            name: self.name.clone(),
            monitor_source: format!("{}.monitor", self.name),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| self.name.clone()),
            sample_spec: SampleSpec {
                format: self
                    .format
                    .as_deref()
                    .map(SampleFormat::from_property)
                    .unwrap_or(SampleFormat::Unknown),
                rate: self.rate.unwrap_or(FALLBACK_RATE),
                channels,
            },
            channel_map,
        }
    }
}

#[derive(Deserialize)]
struct DefaultNode {
    name: String,
}

/// Known sinks keyed by global id
#[derive(Debug, Default)]
pub struct SinkDirectory {
    sinks: BTreeMap<u32, SinkNode>,
    default_sink: Option<String>,
}

impl SinkDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u32, node: SinkNode) {
        self.sinks.insert(id, node);
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut SinkNode> {
        self.sinks.get_mut(&id)
    }

    /// Forget a global. Ids that are not sinks are ignored.
    pub fn remove(&mut self, id: u32) -> Option<SinkNode> {
        self.sinks.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn default_sink(&self) -> Option<&str> {
        self.default_sink.as_deref()
    }

    /// Apply a property from the `default` metadata object.
    ///
    /// A `None` value clears the default, matching how PipeWire removes keys.
    pub fn set_metadata(&mut self, key: Option<&str>, value: Option<&str>) {
        match key {
            Some(DEFAULT_SINK_KEY) => {}
            // A null key clears every property of the object
            None => {
                self.default_sink = None;
                return;
            }
            Some(_) => return,
        }

        self.default_sink = match value {
            Some(json) => match serde_json::from_str::<DefaultNode>(json) {
                Ok(node) => Some(node.name),
                Err(e) => {
                    log::warn!("Ignoring malformed {} value {:?}: {}", DEFAULT_SINK_KEY, json, e);
                    None
                }
            },
            None => None,
        };
    }

    /// Answer a device-info query. An empty name resolves the default sink.
    pub fn resolve(&self, name: &str) -> Option<DeviceInfo> {
        let wanted = if name.is_empty() {
            self.default_sink.as_deref()?
        } else {
            name
        };

        self.sinks
            .values()
            .find(|node| node.name == wanted)
            .map(SinkNode::device_info)
    }
}
