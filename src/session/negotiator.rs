//! Connection state handling and device resolution

use std::io::Write;

use log::{debug, error, info};

use crate::audio::Flow;
use crate::server::{AudioServer, ConnectionState, DeviceInfo};

use super::{Session, EXIT_FAILURE};

impl<S: AudioServer, W: Write> Session<S, W> {
    pub(super) fn on_connection_state(&mut self, state: ConnectionState) -> Flow {
        match state {
            ConnectionState::Unconnected
            | ConnectionState::Connecting
            | ConnectionState::Authorizing
            | ConnectionState::SettingName => {
                debug!("Connection state: {:?}", state);
                Flow::Continue
            }
            ConnectionState::Ready => {
                assert!(
                    self.stream.is_none(),
                    "connection became ready with a capture stream already installed"
                );

                debug!("Connection ready, querying {}", self.query_target());

                match self.connection.query_device_info(&self.configured_device) {
                    Ok(()) => {
                        self.pending_query = Some(0);
                        Flow::Continue
                    }
                    Err(e) => {
                        error!("Failed to query {}: {}", self.query_target(), e);
                        Flow::Quit(EXIT_FAILURE)
                    }
                }
            }
            ConnectionState::Failed => {
                error!("Connection failed");
                Flow::Quit(EXIT_FAILURE)
            }
            ConnectionState::Terminated => {
                debug!("Connection terminated");
                Flow::Continue
            }
        }
    }

    /// One record of the device-info query. `None` ends the list; a query
    /// that ends without any record leaves nothing to monitor.
    pub(super) fn on_device_info(&mut self, info: Option<DeviceInfo>) -> Flow {
        let Some(info) = info else {
            return match self.pending_query.take() {
                Some(0) => {
                    error!("No sink found for {}", self.query_target());
                    Flow::Quit(EXIT_FAILURE)
                }
                _ => Flow::Continue,
            };
        };

        if let Some(records) = self.pending_query.as_mut() {
            *records += 1;
        }

        info!("Monitoring {} ({})", info.description, info.name);
        self.open_capture(
            info.monitor_source,
            info.description,
            &info.sample_spec,
            &info.channel_map,
        )
    }

    fn query_target(&self) -> &str {
        if self.configured_device.is_empty() {
            "default sink"
        } else {
            &self.configured_device
        }
    }
}
