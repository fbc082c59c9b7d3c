//! PipeWire implementation of the audio server seam
//!
//! Every PipeWire callback is translated into an [`Event`] and sent over a
//! `pipewire::channel` attached to the main loop, so the session only ever
//! runs from the loop's top level and never re-entrantly.
//!
//! Capturing a sink's monitor is done by targeting the sink itself with
//! `stream.capture.sink = true`; the `.monitor` suffix used in source names
//! is stripped before connecting.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use log::{debug, error, info, warn};
use pipewire as pw;
use pw::context::ContextRc;
use pw::core::CoreRc;
use pw::main_loop::MainLoopRc;
use pw::metadata::{Metadata, MetadataListener};
use pw::node::{Node, NodeListener};
use pw::registry::{GlobalObject, RegistryRc};
use pw::spa;
use pw::spa::param::audio::{AudioFormat, AudioInfoRaw};
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::param::ParamType;
use pw::spa::pod::Pod;
use pw::spa::sys;
use pw::spa::utils::dict::DictRef;
use pw::spa::utils::result::AsyncSeq;
use pw::types::ObjectType;

use super::directory::{NegotiatedFormat, SinkDirectory, SinkNode};
use super::{
    AudioServer, CaptureStream, ChannelMap, ConnectionState, Event, Fragment, SampleSpec,
    ServerError, StreamId, StreamState,
};

/// Name announced to PipeWire for the client and its stream
pub const APP_NAME: &str = "PipeWire Output Display";

const MONITOR_SUFFIX: &str = ".monitor";

struct PendingQuery {
    seq: AsyncSeq,
    name: String,
}

struct DefaultMetadata {
    _listener: MetadataListener,
    _proxy: Metadata,
}

/// A sink node bound for its full properties and format
struct BoundSink {
    _listener: NodeListener,
    _proxy: Node,
}

/// Graph state shared with the registry, metadata and core callbacks
#[derive(Default)]
struct Shared {
    directory: RefCell<SinkDirectory>,
    metadata: RefCell<Option<DefaultMetadata>>,
    sinks: RefCell<BTreeMap<u32, BoundSink>>,
    connect_seq: Cell<Option<AsyncSeq>>,
    queries: RefCell<Vec<PendingQuery>>,
}

impl Shared {
    fn on_global<P: AsRef<DictRef>>(
        self: &Rc<Self>,
        registry: &RegistryRc,
        global: &GlobalObject<P>,
    ) {
        let props = match &global.props {
            Some(p) => p.as_ref(),
            None => return,
        };

        match global.type_ {
            ObjectType::Node => {
                if props.get(*pw::keys::MEDIA_CLASS) != Some("Audio/Sink") {
                    return;
                }
                let node = SinkNode {
                    name: props
                        .get(*pw::keys::NODE_NAME)
                        .map(String::from)
                        .unwrap_or_else(|| format!("node-{}", global.id)),
                    description: props.get(*pw::keys::NODE_DESCRIPTION).map(String::from),
                    format: props.get("audio.format").map(String::from),
                    rate: props.get("audio.rate").and_then(|s| s.parse().ok()),
                    channels: props
                        .get(*pw::keys::AUDIO_CHANNELS)
                        .and_then(|s| s.parse().ok()),
                    position: props.get("audio.position").map(String::from),
                };
                debug!("Sink {} appeared: {}", global.id, node.name);
                self.directory.borrow_mut().insert(global.id, node);
                self.bind_sink(registry, global);
            }
            ObjectType::Metadata => {
                if props.get("metadata.name") == Some("default") {
                    self.bind_default_metadata(registry, global);
                }
            }
            _ => {}
        }
    }

    fn bind_default_metadata<P: AsRef<DictRef>>(
        self: &Rc<Self>,
        registry: &RegistryRc,
        global: &GlobalObject<P>,
    ) {
        let metadata: Metadata = match registry.bind(global) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to bind default metadata: {}", e);
                return;
            }
        };

        let weak = Rc::downgrade(self);
        let listener = metadata
            .add_listener_local()
            .property(move |subject, key, _type, value| {
                if subject == pw::core::PW_ID_CORE {
                    if let Some(shared) = weak.upgrade() {
                        shared.directory.borrow_mut().set_metadata(key, value);
                    }
                }
                0
            })
            .register();

        *self.metadata.borrow_mut() = Some(DefaultMetadata {
            _listener: listener,
            _proxy: metadata,
        });
    }

    /// Bind a sink node. Its info carries the properties the registry
    /// filters out, and its `Format` param the layout actually in use.
    fn bind_sink<P: AsRef<DictRef>>(
        self: &Rc<Self>,
        registry: &RegistryRc,
        global: &GlobalObject<P>,
    ) {
        let id = global.id;
        let node: Node = match registry.bind(global) {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to bind sink {}: {}", id, e);
                return;
            }
        };

        let on_info = Rc::downgrade(self);
        let on_param = on_info.clone();
        let listener = node
            .add_listener_local()
            .info(move |info| {
                let (Some(shared), Some(props)) = (on_info.upgrade(), info.props()) else {
                    return;
                };
                if let Some(sink) = shared.directory.borrow_mut().get_mut(id) {
                    for (key, value) in props.iter() {
                        sink.apply_property(key, value);
                    }
                }
            })
            .param(move |_seq, param_type, _index, _next, param| {
                if param_type != ParamType::Format {
                    return;
                }
                let Some(info) = param.and_then(parse_raw_audio) else {
                    return;
                };
                let Some(shared) = on_param.upgrade() else {
                    return;
                };
                let negotiated = negotiated_format(&info);
                debug!("Sink {} format: {:?}", id, negotiated);
                if let Some(sink) = shared.directory.borrow_mut().get_mut(id) {
                    sink.apply_format(negotiated);
                }
            })
            .register();

        node.subscribe_params(&[ParamType::Format]);

        self.sinks.borrow_mut().insert(
            id,
            BoundSink {
                _listener: listener,
                _proxy: node,
            },
        );
    }

    fn on_done(&self, seq: AsyncSeq, events: &pw::channel::Sender<Event>) {
        if self.connect_seq.get() == Some(seq) {
            self.connect_seq.set(None);
            debug!(
                "Registry enumerated, {} sink(s) known",
                self.directory.borrow().len()
            );
            let _ = events.send(Event::Connection(ConnectionState::Ready));
            return;
        }

        let answered: Vec<PendingQuery> = {
            let mut queries = self.queries.borrow_mut();
            let (answered, pending) = queries.drain(..).partition(|q| q.seq == seq);
            *queries = pending;
            answered
        };

        for query in answered {
            let info = self.directory.borrow().resolve(&query.name);
            match info {
                Some(info) => {
                    let _ = events.send(Event::DeviceInfo(Some(info)));
                }
                None if query.name.is_empty() => warn!("No default sink is known to PipeWire"),
                None => warn!("No sink named {:?}", query.name),
            }
            let _ = events.send(Event::DeviceInfo(None));
        }
    }
}

/// Connection to the PipeWire daemon
pub struct PipeWireServer {
    _core_listener: pw::core::Listener,
    _registry_listener: pw::registry::Listener,
    shared: Rc<Shared>,
    events: pw::channel::Sender<Event>,
    last_stream: StreamId,
    _registry: RegistryRc,
    core: CoreRc,
    _context: ContextRc,
}

impl PipeWireServer {
    /// Connect to the daemon. `Ready` is sent once the registry is enumerated.
    pub fn connect(
        mainloop: &MainLoopRc,
        events: pw::channel::Sender<Event>,
    ) -> Result<Self, ServerError> {
        let _ = events.send(Event::Connection(ConnectionState::Connecting));

        let context = ContextRc::new(mainloop, None)
            .map_err(|e| ServerError::Init(format!("Failed to create PipeWire context: {}", e)))?;

        let core = context
            .connect_rc(None)
            .map_err(|e| ServerError::Connection(e.to_string()))?;

        let registry = core
            .get_registry_rc()
            .map_err(|e| ServerError::Init(format!("Failed to get PipeWire registry: {}", e)))?;

        let shared = Rc::new(Shared::default());

        let registry_listener = {
            let on_global = Rc::downgrade(&shared);
            let on_remove = on_global.clone();
            let bind_registry = registry.clone();
            registry
                .add_listener_local()
                .global(move |global| {
                    if let Some(shared) = on_global.upgrade() {
                        shared.on_global(&bind_registry, global);
                    }
                })
                .global_remove(move |id| {
                    if let Some(shared) = on_remove.upgrade() {
                        shared.sinks.borrow_mut().remove(&id);
                        if let Some(node) = shared.directory.borrow_mut().remove(id) {
                            debug!("Sink {} removed: {}", id, node.name);
                        }
                    }
                })
                .register()
        };

        let core_listener = {
            let on_done: Weak<Shared> = Rc::downgrade(&shared);
            let done_events = events.clone();
            let error_events = events.clone();
            core.add_listener_local()
                .done(move |id, seq| {
                    if id != pw::core::PW_ID_CORE {
                        return;
                    }
                    if let Some(shared) = on_done.upgrade() {
                        shared.on_done(seq, &done_events);
                    }
                })
                .error(move |id, seq, res, message| {
                    if id == pw::core::PW_ID_CORE {
                        error!("PipeWire connection error {} (seq {}): {}", res, seq, message);
                        let _ = error_events.send(Event::Connection(ConnectionState::Failed));
                    } else {
                        warn!("PipeWire error on object {}: {} ({})", id, message, res);
                    }
                })
                .register()
        };

        let seq = core
            .sync(0)
            .map_err(|e| ServerError::Connection(format!("Initial sync failed: {}", e)))?;
        shared.connect_seq.set(Some(seq));

        info!("Connected to PipeWire");

        Ok(Self {
            _core_listener: core_listener,
            _registry_listener: registry_listener,
            shared,
            events,
            last_stream: 0,
            _registry: registry,
            core,
            _context: context,
        })
    }
}

impl AudioServer for PipeWireServer {
    type Stream = PipeWireStream;

    fn query_device_info(&mut self, name: &str) -> Result<(), ServerError> {
        let seq = self
            .core
            .sync(0)
            .map_err(|e| ServerError::Query(e.to_string()))?;
        self.shared.queries.borrow_mut().push(PendingQuery {
            seq,
            name: name.to_string(),
        });
        Ok(())
    }

    fn open_capture(
        &mut self,
        source: &str,
        spec: &SampleSpec,
        map: &ChannelMap,
    ) -> Result<PipeWireStream, ServerError> {
        let sink = source.strip_suffix(MONITOR_SUFFIX).unwrap_or(source);

        let props = pw::properties::properties! {
            *pw::keys::MEDIA_TYPE => "Audio",
            *pw::keys::MEDIA_CATEGORY => "Capture",
            *pw::keys::MEDIA_ROLE => "Music",
            *pw::keys::APP_NAME => APP_NAME,
            "target.object" => sink,
            "stream.capture.sink" => "true",
        };

        let stream = pw::stream::StreamRc::new(self.core.clone(), APP_NAME, props)
            .map_err(|e| ServerError::Stream(format!("Failed to create stream: {}", e)))?;

        self.last_stream += 1;
        let id = self.last_stream;

        let listener = stream
            .add_local_listener_with_user_data(StreamData {
                id,
                events: self.events.clone(),
                opened: false,
            })
            .state_changed(|_, data, old, new| {
                debug!("Capture stream {} {:?} -> {:?}", data.id, old, new);
                let state = data.translate(&new);
                let _ = data.events.send(Event::Stream(data.id, state));
            })
            .param_changed(|_, data, id, param| {
                if id != ParamType::Format.as_raw() {
                    return;
                }
                if let Some(negotiated) = param.and_then(parse_raw_audio) {
                    debug!(
                        "Capture stream {} negotiated {:?} {}ch {}Hz",
                        data.id,
                        negotiated.format(),
                        negotiated.channels(),
                        negotiated.rate()
                    );
                }
            })
            .process(|_, data| {
                let _ = data.events.send(Event::FragmentReady(data.id));
            })
            .register()
            .map_err(|e| ServerError::Stream(format!("Failed to register stream listener: {}", e)))?;

        let values = format_pod(spec, map)?;
        let mut params = [Pod::from_bytes(&values)
            .ok_or_else(|| ServerError::Stream("Failed to create Pod from bytes".to_string()))?];

        // Not RT_PROCESS: process callbacks must run on the main loop thread
        stream
            .connect(
                spa::utils::Direction::Input,
                None,
                pw::stream::StreamFlags::AUTOCONNECT | pw::stream::StreamFlags::MAP_BUFFERS,
                &mut params,
            )
            .map_err(|e| ServerError::Stream(format!("Failed to connect stream: {}", e)))?;

        Ok(PipeWireStream {
            id,
            _listener: listener,
            stream,
        })
    }
}

/// Parse a raw audio `Format` param
fn parse_raw_audio(param: &Pod) -> Option<AudioInfoRaw> {
    let (media_type, media_subtype) = format_utils::parse_format(param).ok()?;
    if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
        return None;
    }
    let mut info = AudioInfoRaw::new();
    info.parse(param).ok()?;
    Some(info)
}

fn negotiated_format(info: &AudioInfoRaw) -> NegotiatedFormat {
    let channels = info.channels();
    let position = info
        .position()
        .iter()
        .take(channels as usize)
        .map(|&id| channel_name(id))
        .collect::<Vec<_>>();

    NegotiatedFormat {
        format: format_name(info.format()).map(String::from),
        rate: info.rate(),
        channels,
        position: (!position.is_empty()).then(|| position.join(",")),
    }
}

fn format_name(format: AudioFormat) -> Option<&'static str> {
    match format {
        AudioFormat::S16LE => Some("S16LE"),
        AudioFormat::S24LE => Some("S24LE"),
        AudioFormat::S32LE => Some("S32LE"),
        AudioFormat::F32LE => Some("F32LE"),
        _ => None,
    }
}

/// Serialize an F32LE `EnumFormat` pod for the given rate, channels and layout
fn format_pod(spec: &SampleSpec, map: &ChannelMap) -> Result<Vec<u8>, ServerError> {
    let mut audio_info = AudioInfoRaw::new();
    audio_info.set_format(AudioFormat::F32LE);
    audio_info.set_rate(spec.rate);
    audio_info.set_channels(spec.channels);

    let mut position = [0u32; spa::param::audio::MAX_CHANNELS];
    for (slot, name) in position.iter_mut().zip(map.positions()) {
        *slot = channel_id(name);
    }
    audio_info.set_position(position);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| ServerError::Stream(format!("Failed to serialize audio format: {:?}", e)))?
    .0
    .into_inner();

    Ok(values)
}

const CHANNELS: [(&str, u32); 10] = [
    ("MONO", sys::SPA_AUDIO_CHANNEL_MONO),
    ("FL", sys::SPA_AUDIO_CHANNEL_FL),
    ("FR", sys::SPA_AUDIO_CHANNEL_FR),
    ("FC", sys::SPA_AUDIO_CHANNEL_FC),
    ("LFE", sys::SPA_AUDIO_CHANNEL_LFE),
    ("SL", sys::SPA_AUDIO_CHANNEL_SL),
    ("SR", sys::SPA_AUDIO_CHANNEL_SR),
    ("RL", sys::SPA_AUDIO_CHANNEL_RL),
    ("RR", sys::SPA_AUDIO_CHANNEL_RR),
    ("RC", sys::SPA_AUDIO_CHANNEL_RC),
];

fn channel_id(position: &str) -> u32 {
    if let Some(&(_, id)) = CHANNELS.iter().find(|(name, _)| *name == position) {
        return id;
    }
    position
        .strip_prefix("AUX")
        .and_then(|n| n.parse::<u32>().ok())
        .and_then(|n| sys::SPA_AUDIO_CHANNEL_AUX0.checked_add(n))
        .unwrap_or(sys::SPA_AUDIO_CHANNEL_UNKNOWN)
}

fn channel_name(id: u32) -> String {
    if let Some(&(name, _)) = CHANNELS.iter().find(|(_, known)| *known == id) {
        return name.to_string();
    }
    match id.checked_sub(sys::SPA_AUDIO_CHANNEL_AUX0) {
        Some(n) => format!("AUX{}", n),
        None => "UNKNOWN".to_string(),
    }
}

/// User data for the stream callbacks
struct StreamData {
    id: StreamId,
    events: pw::channel::Sender<Event>,
    /// Set once the stream reached Paused/Streaming, so that a later
    /// Unconnected is reported as Terminated.
    opened: bool,
}

impl StreamData {
    fn translate(&mut self, state: &pw::stream::StreamState) -> StreamState {
        match state {
            pw::stream::StreamState::Error(message) => {
                warn!("Capture stream error: {}", message);
                StreamState::Failed
            }
            pw::stream::StreamState::Unconnected if self.opened => StreamState::Terminated,
            pw::stream::StreamState::Unconnected => StreamState::Unconnected,
            pw::stream::StreamState::Connecting => StreamState::Creating,
            pw::stream::StreamState::Paused | pw::stream::StreamState::Streaming => {
                self.opened = true;
                StreamState::Ready
            }
        }
    }
}

/// Capture stream on a sink monitor
pub struct PipeWireStream {
    id: StreamId,
    _listener: pw::stream::StreamListener<StreamData>,
    stream: pw::stream::StreamRc,
}

impl CaptureStream for PipeWireStream {
    type Fragment<'a>
        = PipeWireFragment<'a>
    where
        Self: 'a;

    fn id(&self) -> StreamId {
        self.id
    }

    fn peek(&mut self) -> Result<PipeWireFragment<'_>, ServerError> {
        self.stream
            .dequeue_buffer()
            .map(|buffer| PipeWireFragment { buffer })
            .ok_or_else(|| ServerError::Peek("out of buffers".to_string()))
    }
}

/// A dequeued buffer. PipeWire requeues it when dropped.
pub struct PipeWireFragment<'s> {
    buffer: pw::buffer::Buffer<'s>,
}

impl Fragment for PipeWireFragment<'_> {
    fn bytes(&mut self) -> &[u8] {
        let Some(data) = self.buffer.datas_mut().first_mut() else {
            return &[];
        };
        let offset = data.chunk().offset() as usize;
        let size = data.chunk().size() as usize;

        match data.data() {
            Some(slice) => {
                let start = offset.min(slice.len());
                let end = start.saturating_add(size).min(slice.len());
                &slice[start..end]
            }
            None => &[],
        }
    }
}
