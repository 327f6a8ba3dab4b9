//! Link procedure
//!
//! A short-lived negotiation establishing group-object associations with a
//! peer endpoint. The procedure is triggered exactly once per
//! enter-configuration-mode parameter write, runs as its own task so the
//! triggering request returns immediately, and reports its outcome through a
//! registered callback. A step timeout is terminal; there are no retries.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::task::JoinHandle;

use crate::addr::{BusAddress, DeviceAddress};
use crate::object::pid;
use crate::service::{svc, Request};
use crate::transport::BusTransport;

/// Result callback: accumulated channel flags plus the negotiated map
pub type LinkCallback = Box<dyn Fn(u32, &HashMap<u8, BusAddress>) + Send + Sync>;

/// Lifecycle of one link procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Built but not yet spawned
    Created,
    /// Negotiating with the peer
    Running,
    /// Every channel was acknowledged
    Succeeded,
    /// A step timed out; terminal, not retried
    Failed,
}

/// One link-procedure session
///
/// Created on the trigger, destroyed on completion; never persisted.
pub struct LinkProcedure {
    device: DeviceAddress,
    peer: DeviceAddress,
    device_code: u16,
    group_objects: HashMap<u8, BusAddress>,
    state: LinkState,
    callback: Option<LinkCallback>,
}

impl LinkProcedure {
    /// Whether a parameter write is the enter-configuration-mode trigger
    pub fn is_enter_config_mode(object_type: u16, pid_: u8, info: &[u8]) -> bool {
        object_type == 0 && pid_ == pid::PROGRAMMING_MODE && info == [0x01]
    }

    /// Sensor-side procedure announcing `group_objects` to `peer`
    pub fn for_sensor(
        device: DeviceAddress,
        peer: DeviceAddress,
        device_code: u16,
        group_objects: HashMap<u8, BusAddress>,
    ) -> Self {
        Self {
            device,
            peer,
            device_code,
            group_objects,
            state: LinkState::Created,
            callback: None,
        }
    }

    /// Register the result callback
    pub fn on_result(mut self, f: impl Fn(u32, &HashMap<u8, BusAddress>) + Send + Sync + 'static) -> Self {
        self.callback = Some(Box::new(f));
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Run the procedure as an independent task.
    ///
    /// The caller is not expected to await the handle; the task completes on
    /// its own and invokes the callback with whatever flags it accumulated.
    pub fn spawn(self, transport: Arc<dyn BusTransport>) -> JoinHandle<LinkState> {
        tokio::spawn(self.run(transport))
    }

    async fn run(mut self, transport: Arc<dyn BusTransport>) -> LinkState {
        self.state = LinkState::Running;
        log::debug!(
            "{}: link procedure with {} over {} channel(s)",
            self.device,
            self.peer,
            self.group_objects.len()
        );

        let mut channels: Vec<u8> = self.group_objects.keys().copied().collect();
        channels.sort_unstable();

        let mut flags = 0u32;
        for channel in channels {
            let addr = self.group_objects[&channel];
            let mut asdu = BytesMut::with_capacity(5);
            asdu.put_u8(channel);
            asdu.put_u16(addr.raw());
            asdu.put_u16(self.device_code);
            let request = Request::Management {
                svc_type: svc::LINK_WRITE,
                asdu: asdu.freeze(),
            };
            match transport.request(self.peer, request).await {
                Ok(Some(_)) => flags |= 1 << channel,
                Ok(None) => {
                    log::warn!(
                        "{}: link procedure: {} ignored channel {}",
                        self.device,
                        self.peer,
                        channel
                    );
                    self.state = LinkState::Failed;
                    break;
                }
                Err(e) => {
                    log::warn!("{}: link procedure failed: {}", self.device, e);
                    self.state = LinkState::Failed;
                    break;
                }
            }
        }

        if self.state != LinkState::Failed {
            self.state = LinkState::Succeeded;
        }
        if let Some(callback) = &self.callback {
            callback(flags, &self.group_objects);
        }
        self.state
    }
}
