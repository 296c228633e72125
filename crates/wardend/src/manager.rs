//! Entity registry and dispatch of external events.
//!
//! The manager exclusively owns every entity, the transport, and the job
//! scheduler. External requests (start, stop, device hot-plug) and loop
//! callbacks (readiness, request completions, service state changes) all
//! enter here, are routed to the addressed entity by id, and leave behind a
//! queue of status changes that is flushed to the health reporter before the
//! call returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use nix::sys::epoll::EpollFlags;
use tracing::{debug, warn};
use warden_config::BusScope;

use crate::busname::{BusName, BusNameConfig, Context};
use crate::entity::{EntityId, Registry};
use crate::error::{LoadError, StartError, StopError};
use crate::health::HealthReporter;
use crate::link::{Link, LinkContext};
use crate::network::{Device, NetworkMatcher};
use crate::notify::NotificationBus;
use crate::persistence::{
    DescriptorTable, PersistError, SectionKey, end_section, parse_sections, write_header,
};
use crate::service::{JobScheduler, ServiceSnapshot};
use crate::status::ActivationResult;
use crate::transport::{Completion, Transport};

/// Owner of every entity on the event loop.
pub struct Manager<T: Transport, J: JobScheduler> {
    transport: T,
    jobs: J,
    scope: BusScope,
    bus: NotificationBus,
    reporter: Arc<dyn HealthReporter>,
    networks: Box<dyn NetworkMatcher>,
    busnames: Registry<BusName>,
    busnames_by_unit: BTreeMap<String, EntityId>,
    links: Registry<Link>,
    links_by_ifindex: BTreeMap<u32, EntityId>,
    bridges: BTreeMap<String, u32>,
    stashed_links: BTreeMap<u32, Vec<(String, String)>>,
}

impl<T: Transport, J: JobScheduler> Manager<T, J> {
    /// Builds an empty manager.
    pub fn new(
        transport: T,
        jobs: J,
        scope: BusScope,
        reporter: Arc<dyn HealthReporter>,
        networks: Box<dyn NetworkMatcher>,
    ) -> Self {
        Self {
            transport,
            jobs,
            scope,
            bus: NotificationBus::new(),
            reporter,
            networks,
            busnames: Registry::new(),
            busnames_by_unit: BTreeMap::new(),
            links: Registry::new(),
            links_by_ifindex: BTreeMap::new(),
            bridges: BTreeMap::new(),
            stashed_links: BTreeMap::new(),
        }
    }

    /// Transport the manager drives.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Job scheduler the manager drives.
    pub const fn jobs(&self) -> &J {
        &self.jobs
    }

    /// Trigger edges and queued notifications.
    pub const fn notifications(&self) -> &NotificationBus {
        &self.bus
    }

    /// Bus name loaded for `unit`.
    pub fn busname(&self, unit: &str) -> Option<&BusName> {
        self.busnames_by_unit
            .get(unit)
            .and_then(|id| self.busnames.get(*id))
    }

    /// Link for interface `ifindex`.
    pub fn link(&self, ifindex: u32) -> Option<&Link> {
        self.links_by_ifindex
            .get(&ifindex)
            .and_then(|id| self.links.get(*id))
    }

    /// Interface index of a known bridge master.
    pub fn bridge(&self, name: &str) -> Option<u32> {
        self.bridges.get(name).copied()
    }

    /// Number of loaded bus names.
    pub fn busname_count(&self) -> usize {
        self.busnames.len()
    }

    /// Number of known links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Creates a bus name and wires its trigger edge to the service.
    pub fn load_busname(&mut self, config: BusNameConfig) -> Result<EntityId, LoadError> {
        if self.busnames_by_unit.contains_key(&config.unit) {
            return Err(LoadError::Duplicate {
                entity: config.unit,
            });
        }
        let id = self
            .busnames
            .try_insert_with(|id| BusName::load(id, config))?;
        if let Some(busname) = self.busnames.get(id) {
            debug!(
                busname = %busname.unit(),
                service = %busname.service(),
                id = %id,
                "loaded bus name"
            );
            self.bus
                .graph_mut()
                .add_trigger(busname.unit(), busname.service());
            self.busnames_by_unit.insert(busname.unit().to_owned(), id);
        }
        Ok(id)
    }

    /// Tears down and removes a bus name. Returns `false` when it is unknown.
    pub fn unload_busname(&mut self, unit: &str) -> bool {
        let Some(id) = self.busnames_by_unit.remove(unit) else {
            return false;
        };
        if let Some(busname) = self.busnames.get_mut(id) {
            busname.teardown(&mut self.transport);
        }
        let Some(busname) = self.busnames.remove(id) else {
            return false;
        };
        self.bus.graph_mut().remove_observer(unit);
        self.reporter.entity_removed(&busname.entity_ref());
        drop(busname);
        true
    }

    /// Starts a bus name.
    pub fn start_busname(&mut self, unit: &str) -> Result<(), StartError> {
        let outcome = self
            .with_busname(unit, |busname, ctx| busname.start(ctx))
            .ok_or_else(|| StartError::UnknownEntity {
                entity: unit.to_owned(),
            })?;
        self.flush();
        outcome
    }

    /// Stops a bus name.
    pub fn stop_busname(&mut self, unit: &str) -> Result<(), StopError> {
        self.with_busname(unit, BusName::stop)
            .ok_or_else(|| StopError::UnknownEntity {
                entity: unit.to_owned(),
            })?;
        self.flush();
        Ok(())
    }

    /// Clears the failed state of a bus name.
    pub fn reset_failed_busname(&mut self, unit: &str) -> bool {
        let found = self.with_busname(unit, BusName::reset_failed).is_some();
        self.flush();
        found
    }

    /// Status block of a bus name.
    pub fn dump_busname(&self, unit: &str, prefix: &str) -> Option<String> {
        self.busname(unit).map(|busname| busname.dump(prefix))
    }

    /// Handles readiness of a watched starter descriptor.
    pub fn dispatch_readiness(&mut self, id: EntityId, revents: EpollFlags) {
        let mut ctx = Context {
            transport: &mut self.transport,
            jobs: &mut self.jobs,
            bus: &mut self.bus,
            scope: self.scope,
        };
        match self.busnames.get_mut(id) {
            Some(busname) => busname.dispatch_io(revents, &mut ctx),
            None => debug!(id = %id, "readiness for a removed bus name ignored"),
        }
        self.flush();
    }

    /// Delivers a service state change to every bus name triggering it.
    pub fn service_changed(&mut self, service: &ServiceSnapshot) {
        for observer in self.bus.graph().observers_of(&service.unit) {
            let Some(id) = self.busnames_by_unit.get(&observer).copied() else {
                continue;
            };
            let mut ctx = Context {
                transport: &mut self.transport,
                jobs: &mut self.jobs,
                bus: &mut self.bus,
                scope: self.scope,
            };
            if let Some(busname) = self.busnames.get_mut(id) {
                busname.trigger_notify(service, &mut ctx);
            }
        }
        self.flush();
    }

    /// Creates a link for a device that appeared and configures it when a
    /// network matches. Devices already known are ignored.
    pub fn link_added(&mut self, device: &Device) -> Result<(), LoadError> {
        if self.links_by_ifindex.contains_key(&device.ifindex) {
            return Ok(());
        }
        let id = self.links.try_insert_with(|id| Link::new(id, device))?;
        self.links_by_ifindex.insert(device.ifindex, id);
        debug!(link = %device.ifname, ifindex = device.ifindex, id = %id, "link added");

        let stashed = self.stashed_links.remove(&device.ifindex);
        if device.is_bridge() {
            debug!(link = %device.ifname, "recorded bridge master");
            self.bridges.insert(device.ifname.clone(), device.ifindex);
            return Ok(());
        }

        let network = self.networks.network_for(device);
        let master = network
            .as_ref()
            .and_then(|network| network.bridge.as_deref())
            .and_then(|bridge| self.bridges.get(bridge).copied());

        let mut ctx = LinkContext {
            transport: &mut self.transport,
            bus: &mut self.bus,
        };
        if let Some(link) = self.links.get_mut(id) {
            for (key, value) in stashed.into_iter().flatten() {
                link.deserialize_item(&key, &value);
            }
            match network {
                Some(network) => {
                    link.apply(network, master);
                    if link.has_deserialized_state() {
                        link.coldplug(&mut ctx);
                    } else {
                        link.configure(&mut ctx);
                    }
                }
                None => {
                    debug!(link = %device.ifname, "no matching network");
                    link.coldplug(&mut ctx);
                }
            }
        }
        self.flush();
        Ok(())
    }

    /// Destroys the link for `ifindex`. Returns `false` when it is unknown.
    ///
    /// Requests still in flight complete against a stale id and are dropped.
    pub fn link_removed(&mut self, ifindex: u32) -> bool {
        let Some(id) = self.links_by_ifindex.remove(&ifindex) else {
            return false;
        };
        self.bridges.retain(|_, master| *master != ifindex);
        let Some(link) = self.links.remove(id) else {
            return false;
        };
        debug!(
            link = %link.ifname(),
            pending = link.pending_operations(),
            "link removed"
        );
        self.reporter.entity_removed(&link.entity_ref());
        true
    }

    /// Routes a transport completion to the link that issued it.
    pub fn dispatch_completion(&mut self, completion: Completion) {
        let ticket = completion.ticket;
        let mut ctx = LinkContext {
            transport: &mut self.transport,
            bus: &mut self.bus,
        };
        match self.links.get_mut(ticket.entity) {
            Some(link) => link.complete(ticket.operation, completion.status, &mut ctx),
            None => debug!(
                id = %ticket.entity,
                operation = %ticket.operation,
                "completion for a removed link ignored"
            ),
        }
        self.flush();
    }

    /// (Re)configures a link that is idle or failed.
    pub fn start_link(&mut self, ifindex: u32) -> Result<(), StartError> {
        self.with_link(ifindex, Link::start)
            .ok_or_else(|| StartError::UnknownEntity {
                entity: format!("link {ifindex}"),
            })?;
        self.flush();
        Ok(())
    }

    /// Interrupts or tears down the configuration of a link.
    pub fn stop_link(&mut self, ifindex: u32) -> Result<(), StopError> {
        self.with_link(ifindex, Link::stop)
            .ok_or_else(|| StopError::UnknownEntity {
                entity: format!("link {ifindex}"),
            })?;
        self.flush();
        Ok(())
    }

    /// Clears the failed state of a link.
    pub fn reset_failed_link(&mut self, ifindex: u32) -> bool {
        let found = self.with_link(ifindex, Link::reset_failed).is_some();
        self.flush();
        found
    }

    /// Status block of a link.
    pub fn dump_link(&self, ifindex: u32, prefix: &str) -> Option<String> {
        self.link(ifindex).map(|link| link.dump(prefix))
    }

    /// Writes one section per entity and duplicates live descriptors into
    /// `fds`.
    pub fn serialize(&self, fds: &mut DescriptorTable) -> Result<String, PersistError> {
        let mut out = String::new();
        for (_, busname) in self.busnames.iter() {
            write_header(&mut out, &SectionKey::BusName(busname.unit().to_owned()));
            busname.serialize(&mut out, fds)?;
            end_section(&mut out);
        }
        for (_, link) in self.links.iter() {
            write_header(&mut out, &SectionKey::Link(link.ifindex()));
            link.serialize(&mut out);
            end_section(&mut out);
        }
        Ok(out)
    }

    /// First restore phase: records serialized state without touching any
    /// live resource.
    ///
    /// Sections for bus names that are not loaded are dropped; sections for
    /// links whose device has not appeared yet are kept until it does.
    pub fn deserialize(&mut self, text: &str, fds: &mut DescriptorTable) {
        for section in parse_sections(text) {
            match section.key {
                SectionKey::BusName(unit) => {
                    let Some(busname) = self
                        .busnames_by_unit
                        .get(&unit)
                        .and_then(|id| self.busnames.get_mut(*id))
                    else {
                        debug!(busname = %unit, "state for an unknown bus name dropped");
                        continue;
                    };
                    for (key, value) in &section.items {
                        busname.deserialize_item(key, value, fds);
                    }
                }
                SectionKey::Link(ifindex) => {
                    let link = self
                        .links_by_ifindex
                        .get(&ifindex)
                        .and_then(|id| self.links.get_mut(*id));
                    match link {
                        Some(link) => {
                            for (key, value) in &section.items {
                                link.deserialize_item(key, value);
                            }
                        }
                        None => {
                            self.stashed_links
                                .entry(ifindex)
                                .or_default()
                                .extend(section.items);
                        }
                    }
                }
            }
        }
    }

    /// Second restore phase: re-arms descriptors and watches and applies
    /// restored states.
    pub fn coldplug(&mut self) {
        for id in self.busnames.ids() {
            let mut ctx = Context {
                transport: &mut self.transport,
                jobs: &mut self.jobs,
                bus: &mut self.bus,
                scope: self.scope,
            };
            let Some(busname) = self.busnames.get_mut(id) else {
                continue;
            };
            if let Err(error) = busname.coldplug(&mut ctx) {
                warn!(busname = %busname.unit(), %error, "failed to restore bus name");
                self.reporter.coldplug_failed(&busname.entity_ref(), &error);
                busname.enter_dead(ActivationResult::Resources, &mut ctx);
            }
        }
        for id in self.links.ids() {
            let mut ctx = LinkContext {
                transport: &mut self.transport,
                bus: &mut self.bus,
            };
            if let Some(link) = self.links.get_mut(id) {
                link.coldplug(&mut ctx);
            }
        }
        self.flush();
    }

    fn with_busname<R>(
        &mut self,
        unit: &str,
        action: impl FnOnce(&mut BusName, &mut Context<'_>) -> R,
    ) -> Option<R> {
        let id = self.busnames_by_unit.get(unit).copied()?;
        let busname = self.busnames.get_mut(id)?;
        let mut ctx = Context {
            transport: &mut self.transport,
            jobs: &mut self.jobs,
            bus: &mut self.bus,
            scope: self.scope,
        };
        Some(action(busname, &mut ctx))
    }

    fn with_link<R>(
        &mut self,
        ifindex: u32,
        action: impl FnOnce(&mut Link, &mut LinkContext<'_>) -> R,
    ) -> Option<R> {
        let id = self.links_by_ifindex.get(&ifindex).copied()?;
        let link = self.links.get_mut(id)?;
        let mut ctx = LinkContext {
            transport: &mut self.transport,
            bus: &mut self.bus,
        };
        Some(action(link, &mut ctx))
    }

    fn flush(&mut self) {
        for change in self.bus.drain() {
            self.reporter.status_changed(&change);
        }
    }
}

impl<T: Transport, J: JobScheduler> Drop for Manager<T, J> {
    fn drop(&mut self) {
        for id in self.busnames.ids() {
            if let Some(busname) = self.busnames.get_mut(id) {
                busname.teardown(&mut self.transport);
            }
            drop(self.busnames.remove(id));
        }
        self.busnames_by_unit.clear();
        for id in self.links.ids() {
            drop(self.links.remove(id));
        }
        self.links_by_ifindex.clear();
    }
}
