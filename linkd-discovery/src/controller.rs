//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use linkd_netlib::configtree::Configurable;
use tokio::sync::watch;
use tokio::time::{interval, interval_at};
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::connection::Session;
use crate::ports::PortMonitor;
use crate::tasks::Task;

/// Lifecycle states of the discovery controller.
///
/// Forward transitions never skip states; any southbound failure drives
/// the controller back to `Disconnected`. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Disconnected,
    Connected,
    PipelineAvailable,
    Elected,
    PortsDiscovered,
    Configured,
    Reconfigured,
    Stopped,
}

/// Operational status of a switch port.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PortStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

/// A switch port discovered via the device's gNMI interface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Port {
    pub id: String,
    pub number: u32,
    pub status: PortStatus,
    pub last_change: Option<u64>,
}

/// A discovered ingress adjacency: the neighbor device and port attached
/// to one of our ingress ports.
#[derive(Clone, Debug)]
pub struct Link {
    pub ingress_port: u32,
    pub egress_port: u32,
    pub egress_device_id: String,
    pub last_update: Instant,
}

/// Controller data guarded by a single reader-writer lock.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) ports: HashMap<String, Port>,
    pub(crate) links: HashMap<u32, Link>,
    pub(crate) config: AgentConfig,
}

/// The link discovery controller.
#[derive(Clone)]
pub struct Controller(pub(crate) Arc<ControllerInner>);

pub(crate) struct ControllerInner {
    target_address: String,
    agent_id: String,
    config_file: PathBuf,
    shared: RwLock<Shared>,
    state_tx: watch::Sender<State>,
    tree: Arc<Configurable>,
    pub(crate) monitor: Mutex<PortMonitor>,
}

// ===== impl PortStatus =====

impl PortStatus {
    pub(crate) fn from_oper_status(status: &str) -> PortStatus {
        match status {
            "UP" => PortStatus::Up,
            "DOWN" => PortStatus::Down,
            _ => PortStatus::Unknown,
        }
    }
}

// ===== impl Port =====

impl Port {
    pub(crate) fn new(id: &str) -> Port {
        Port {
            id: id.to_owned(),
            number: 0,
            status: PortStatus::Unknown,
            last_change: None,
        }
    }
}

// ===== impl Controller =====

impl Controller {
    /// Creates a new controller for the device at `target_address`.
    ///
    /// `agent_id` is the identity advertised as the Chassis ID of emitted
    /// LLDP frames. The configuration is loaded from `config_file` and
    /// persisted back to it on northbound updates.
    pub fn new(
        target_address: &str,
        agent_id: &str,
        config_file: PathBuf,
    ) -> Controller {
        let config = AgentConfig::load(&config_file);
        let (state_tx, _state_rx) = watch::channel(State::Disconnected);

        let controller = Controller(Arc::new(ControllerInner {
            target_address: target_address.to_owned(),
            agent_id: agent_id.to_owned(),
            config_file,
            shared: RwLock::new(Shared {
                config,
                ..Default::default()
            }),
            state_tx,
            tree: Arc::new(Configurable::new()),
            monitor: Mutex::new(PortMonitor::default()),
        }));
        controller.populate_config_tree();

        // The tree owns no reference back to the controller; configuration
        // changes are delivered through this callback instead.
        let weak = Arc::downgrade(&controller.0);
        controller.0.tree.on_config_changed(Box::new(move |paths| {
            if let Some(inner) = weak.upgrade() {
                Controller(inner).refresh_config(paths);
            }
        }));

        controller
    }

    /// Starts the state machine driver. The returned task handle cancels
    /// the driver when dropped.
    pub fn start(&self) -> Task<()> {
        let controller = self.clone();
        Task::spawn(async move { controller.run().await })
    }

    /// Requests a permanent stop. The state machine driver exits once it
    /// observes the transition.
    pub fn stop(&self) {
        info!("stopping link discovery");
        self.0.state_tx.send_modify(|state| *state = State::Stopped);
    }

    /// The configuration/state tree mirroring discovered links, shared
    /// with the northbound gNMI service.
    pub fn tree(&self) -> Arc<Configurable> {
        self.0.tree.clone()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> State {
        *self.0.state_tx.borrow()
    }

    /// Returns a snapshot of the cached configuration.
    pub fn config(&self) -> AgentConfig {
        self.0.shared.read().unwrap().config.clone()
    }

    /// Returns a snapshot of the known ports, sorted by port number.
    pub fn ports(&self) -> Vec<Port> {
        let mut ports: Vec<_> = self
            .0
            .shared
            .read()
            .unwrap()
            .ports
            .values()
            .cloned()
            .collect();
        ports.sort_by_key(|port| port.number);
        ports
    }

    /// Returns a snapshot of the discovered links, sorted by ingress port.
    pub fn links(&self) -> Vec<Link> {
        let mut links: Vec<_> = self
            .0
            .shared
            .read()
            .unwrap()
            .links
            .values()
            .cloned()
            .collect();
        links.sort_by_key(|link| link.ingress_port);
        links
    }

    pub(crate) fn target_address(&self) -> &str {
        &self.0.target_address
    }

    pub(crate) fn agent_id(&self) -> &str {
        &self.0.agent_id
    }

    pub(crate) fn config_file(&self) -> &Path {
        &self.0.config_file
    }

    pub(crate) fn shared(&self) -> RwLockReadGuard<'_, Shared> {
        self.0.shared.read().unwrap()
    }

    pub(crate) fn shared_mut(&self) -> RwLockWriteGuard<'_, Shared> {
        self.0.shared.write().unwrap()
    }

    // A receiver observing state transitions.
    pub(crate) fn state_rx(&self) -> watch::Receiver<State> {
        self.0.state_tx.subscribe()
    }

    // Unconditionally transitions to the given state. `Stopped` is sticky.
    pub(crate) fn set_state(&self, next: State) {
        self.0.state_tx.send_if_modified(|state| {
            if *state == State::Stopped || *state == next {
                return false;
            }
            debug!(from = ?state, to = ?next, "state transition");
            *state = next;
            true
        });
    }

    // Transitions to `next` only if the current state is `cond`,
    // resolving races between the state machine driver and the receive
    // and port-monitor tasks.
    pub(crate) fn set_state_if(&self, cond: State, next: State) -> bool {
        self.0.state_tx.send_if_modified(|state| {
            if *state == State::Stopped || *state != cond || *state == next {
                return false;
            }
            debug!(from = ?state, to = ?next, "state transition");
            *state = next;
            true
        })
    }

    // Sleeps for the given duration, returning early if the state leaves
    // `cond` in the meantime.
    pub(crate) async fn pause_if(&self, cond: State, pause: Duration) {
        let mut state_rx = self.state_rx();
        let sleep = tokio::time::sleep(pause);
        tokio::pin!(sleep);

        while self.state() == cond {
            tokio::select! {
                _ = &mut sleep => return,
                result = state_rx.changed() => {
                    if result.is_err() {
                        return;
                    }
                }
            }
        }
    }

    // The state machine driver. Owns the device session and the receive
    // task; every per-state routine returns once the state has moved on.
    async fn run(&self) {
        let mut session: Option<Session> = None;
        let mut receive_task: Option<Task<()>> = None;

        loop {
            match self.state() {
                State::Disconnected => {
                    // Tear down the previous session context, aborting
                    // in-flight RPCs and the tasks reading from them.
                    drop(receive_task.take());
                    self.0.monitor.lock().unwrap().stop();
                    drop(session.take());
                    session = self.wait_for_device_connection().await;
                }
                State::Connected => {
                    let Some(session) = session.as_mut() else {
                        self.set_state(State::Disconnected);
                        continue;
                    };
                    self.wait_for_pipeline_configuration(session).await;
                }
                State::PipelineAvailable => {
                    drop(receive_task.take());
                    let Some(session) = session.as_mut() else {
                        self.set_state(State::Disconnected);
                        continue;
                    };
                    self.wait_for_mastership_arbitration(session).await;
                }
                State::Elected => {
                    let Some(session) = session.as_mut() else {
                        self.set_state(State::Disconnected);
                        continue;
                    };
                    self.discover_ports(session).await;
                }
                State::PortsDiscovered => {
                    let Some(session) = session.as_mut() else {
                        self.set_state(State::Disconnected);
                        continue;
                    };
                    self.program_packet_intercept_rule(session).await;
                    receive_task = self.spawn_receive_loop(session);
                    self.set_state_if(
                        State::PortsDiscovered,
                        State::Configured,
                    );
                }
                State::Configured => {
                    let Some(session) = session.as_mut() else {
                        self.set_state(State::Disconnected);
                        continue;
                    };
                    self.run_tickers(session).await;
                }
                State::Reconfigured => {
                    // One-shot signal: re-enter Configured so the ticker
                    // loop rebuilds its timers with the fresh periods.
                    self.set_state_if(State::Reconfigured, State::Configured);
                }
                State::Stopped => {
                    self.0.monitor.lock().unwrap().stop();
                    break;
                }
            }
        }
        info!("link discovery stopped");
    }

    // Periodic work while fully configured. Returns when the state leaves
    // `Configured`, which also cancels all four tickers.
    async fn run_tickers(&self, session: &mut Session) {
        let config = self.config();
        let mut emit = interval(ticker_period(config.emit_frequency));

        let validation_period =
            ticker_period(config.pipeline_validation_frequency);
        let mut validation = interval_at(
            tokio::time::Instant::now() + validation_period,
            validation_period,
        );

        let rediscovery_period =
            ticker_period(config.port_rediscovery_frequency);
        let mut rediscovery = interval_at(
            tokio::time::Instant::now() + rediscovery_period,
            rediscovery_period,
        );

        let mut prune = interval(ticker_period(config.link_prune_frequency));

        let mut state_rx = self.state_rx();

        loop {
            tokio::select! {
                _ = emit.tick() => {
                    self.emit_lldp_packets(session).await;
                }
                _ = validation.tick() => {
                    self.validate_pipeline_configuration(session).await;
                }
                _ = rediscovery.tick() => {
                    self.discover_ports(session).await;
                }
                _ = prune.tick() => {
                    self.prune_links();
                }
                result = state_rx.changed() => {
                    if result.is_err() {
                        return;
                    }
                }
            }

            // Any transition out of Configured stops all tickers.
            if self.state() != State::Configured {
                return;
            }
        }
    }
}

// ===== helper functions =====

// Ticker periods are configured in seconds; a zero period would make the
// interval spin, so it is clamped to one second.
fn ticker_period(seconds: u64) -> Duration {
    Duration::from_secs(seconds.max(1))
}
