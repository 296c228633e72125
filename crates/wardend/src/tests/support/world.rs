//! BDD test world: owns a manager wired to recording doubles plus the last
//! results observed by step functions.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};

use nix::sys::epoll::EpollFlags;
use nix::sys::stat::fstat;
use warden_config::BusScope;

use crate::busname::BusNameConfig;
use crate::error::{LoadError, StartError};
use crate::manager::Manager;
use crate::network::{Device, Network, NetworkMatcher};
use crate::persistence::DescriptorTable;
use crate::service::ServiceSnapshot;
use crate::transport::{Completion, LinkRequest};

use super::jobs::RecordingJobScheduler;
use super::reporter::{HealthEvent, RecordingHealthReporter};
use super::transport::RecordingTransport;

type SharedNetworks = Arc<Mutex<BTreeMap<String, Network>>>;

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    pub reporter: Arc<RecordingHealthReporter>,
    pub transport: RecordingTransport,
    pub jobs: RecordingJobScheduler,
    networks: SharedNetworks,
    manager: Manager<RecordingTransport, RecordingJobScheduler>,
    definitions: Vec<BusNameConfig>,
    devices: BTreeMap<u32, Device>,
    event_mark: usize,
    pub load_result: Option<Result<(), LoadError>>,
    pub start_result: Option<Result<(), StartError>>,
    pub starter_inode: Option<u64>,
}

impl TestWorld {
    /// Builds a world with an empty manager.
    #[must_use]
    pub fn new() -> Self {
        let reporter = Arc::new(RecordingHealthReporter::default());
        let transport = RecordingTransport::default();
        let jobs = RecordingJobScheduler::default();
        let networks = SharedNetworks::default();
        let manager = build_manager(&reporter, &transport, &jobs, &networks);
        Self {
            reporter,
            transport,
            jobs,
            networks,
            manager,
            definitions: Vec::new(),
            devices: BTreeMap::new(),
            event_mark: 0,
            load_result: None,
            start_result: None,
            starter_inode: None,
        }
    }

    /// Manager under test.
    #[must_use]
    pub fn manager(&self) -> &Manager<RecordingTransport, RecordingJobScheduler> {
        &self.manager
    }

    /// Mutable manager under test.
    pub fn manager_mut(&mut self) -> &mut Manager<RecordingTransport, RecordingJobScheduler> {
        &mut self.manager
    }

    /// Makes `network` apply to the interface called `ifname`.
    pub fn define_network(&self, ifname: &str, network: Network) {
        self.networks
            .lock()
            .expect("network map mutex poisoned")
            .insert(ifname.to_owned(), network);
    }

    /// Rewrites the network applied to `ifname`, creating it when missing.
    pub fn update_network(&self, ifname: &str, update: impl FnOnce(Network) -> Network) {
        let mut networks = self.networks.lock().expect("network map mutex poisoned");
        let current = networks
            .remove(ifname)
            .unwrap_or_else(|| Network::new(ifname));
        networks.insert(ifname.to_owned(), update(current));
    }

    /// Loads a bus name definition and remembers it for re-execution.
    pub fn load_busname(&mut self, config: BusNameConfig) {
        let result = self.manager.load_busname(config.clone()).map(|_| ());
        if result.is_ok() {
            self.definitions.push(config);
        }
        self.load_result = Some(result);
    }

    /// Starts a bus name and records the outcome.
    pub fn start_busname(&mut self, unit: &str) {
        self.start_result = Some(self.manager.start_busname(unit));
    }

    /// Reports readiness on the starter descriptor of `unit`.
    pub fn signal_readiness(&mut self, unit: &str, revents: EpollFlags) {
        let Some(id) = self.manager.busname(unit).map(|busname| busname.id()) else {
            return;
        };
        self.manager.dispatch_readiness(id, revents);
    }

    /// Delivers a service state change.
    pub fn service_changed(&mut self, snapshot: &ServiceSnapshot) {
        self.manager.service_changed(snapshot);
    }

    /// Reports a device that appeared.
    pub fn add_device(&mut self, device: Device) {
        self.load_result = Some(self.manager.link_added(&device));
        self.devices.insert(device.ifindex, device);
    }

    /// Reports that interface `ifindex` disappeared.
    pub fn remove_device(&mut self, ifindex: u32) -> bool {
        self.devices.remove(&ifindex);
        self.manager.link_removed(ifindex)
    }

    /// Completes the oldest queued request matching `predicate`.
    pub fn complete(
        &mut self,
        predicate: impl Fn(&LinkRequest) -> bool,
        status: Result<(), nix::errno::Errno>,
    ) -> bool {
        let Some(completion) = self.transport.complete_matching(predicate, status) else {
            return false;
        };
        self.manager.dispatch_completion(completion);
        true
    }

    /// Completes every queued request successfully.
    pub fn complete_all(&mut self) -> usize {
        let completions: Vec<Completion> = self.transport.complete_all();
        let count = completions.len();
        for completion in completions {
            self.manager.dispatch_completion(completion);
        }
        count
    }

    /// Display name of the link for `ifindex`, as used in notifications.
    #[must_use]
    pub fn link_entity(&self, ifindex: u32) -> String {
        let ifname = self
            .devices
            .get(&ifindex)
            .map_or("unknown", |device| device.ifname.as_str());
        format!("{ifname} ({ifindex})")
    }

    /// Remembers how many health events have been seen so far.
    pub fn mark_events(&mut self) {
        self.event_mark = self.reporter.events().len();
    }

    /// Health events recorded since [`TestWorld::mark_events`].
    #[must_use]
    pub fn events_since_mark(&self) -> Vec<HealthEvent> {
        self.reporter
            .events()
            .into_iter()
            .skip(self.event_mark)
            .collect()
    }

    /// Inode of the starter descriptor held by `unit`.
    #[must_use]
    pub fn inode_of_starter(&self, unit: &str) -> Option<u64> {
        let starter = self.manager.busname(unit)?.starter()?;
        let stat = fstat(starter.as_raw_fd()).ok()?;
        Some(u64::from(stat.st_ino))
    }

    /// Serializes every entity, replaces the manager with a fresh one, and
    /// restores the state into it as a re-executed supervisor would.
    pub fn reexecute(&mut self) -> Result<(), String> {
        let mut fds = DescriptorTable::new();
        let text = self
            .manager
            .serialize(&mut fds)
            .map_err(|error| error.to_string())?;

        self.transport = RecordingTransport::default();
        self.manager = build_manager(&self.reporter, &self.transport, &self.jobs, &self.networks);
        for config in self.definitions.clone() {
            self.manager
                .load_busname(config)
                .map_err(|error| error.to_string())?;
        }
        self.manager.deserialize(&text, &mut fds);
        self.manager.coldplug();

        for device in self.devices.values().cloned().collect::<Vec<_>>() {
            self.manager
                .link_added(&device)
                .map_err(|error| error.to_string())?;
        }
        Ok(())
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

fn build_manager(
    reporter: &Arc<RecordingHealthReporter>,
    transport: &RecordingTransport,
    jobs: &RecordingJobScheduler,
    networks: &SharedNetworks,
) -> Manager<RecordingTransport, RecordingJobScheduler> {
    Manager::new(
        transport.clone(),
        jobs.clone(),
        BusScope::System,
        reporter.clone(),
        network_matcher(networks),
    )
}

fn network_matcher(networks: &SharedNetworks) -> Box<dyn NetworkMatcher> {
    let networks = Arc::clone(networks);
    Box::new(move |device: &Device| {
        networks
            .lock()
            .ok()
            .and_then(|map| map.get(&device.ifname).cloned())
    })
}

/// Default test world fixture.
#[must_use]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
