//! Network context
//!
//! [`Network`] stands in for the world engine: it owns every router (indexed
//! by host address), the connection table and the virtual clock, and turns
//! contact and message events into router calls. While a router updates it
//! is taken out of its slot, and the [`SimContext`] it receives lends out the
//! remaining routers by address.

use ferry_core::{
    Clock, ConnectionId, ConnectionTable, HostId, Message, MessageId, RouterError, RouterResult,
    SharedListener, SimClock, SimTime,
};
use ferry_logging::HostContextGuard;
use tracing::{debug, debug_span, info};

use crate::report::RouterReport;
use crate::router::{Env, Router};
use crate::strategy::{ForwardingStrategy, Peers};

/// Access to the other routers while one router is being updated
pub struct SimContext<'a, S> {
    now: SimTime,
    connections: &'a mut ConnectionTable,
    routers: &'a mut [Option<Router<S>>],
}

impl<'a, S: ForwardingStrategy> SimContext<'a, S> {
    /// Create a context over an arena of routers
    pub fn new(
        now: SimTime,
        connections: &'a mut ConnectionTable,
        routers: &'a mut [Option<Router<S>>],
    ) -> Self {
        Self {
            now,
            connections,
            routers,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Clock and connections as a router sees them
    pub fn env(&self) -> Env<'_> {
        Env {
            now: self.now,
            connections: &*self.connections,
        }
    }

    pub fn connections(&self) -> &ConnectionTable {
        &*self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionTable {
        &mut *self.connections
    }

    /// Router of `host`
    pub fn router(&self, host: HostId) -> RouterResult<&Router<S>> {
        self.routers
            .get(host.index())
            .and_then(Option::as_ref)
            .ok_or(RouterError::UnknownHost(host))
    }

    /// Router of `host`, mutably
    pub fn router_mut(&mut self, host: HostId) -> RouterResult<&mut Router<S>> {
        self.routers
            .get_mut(host.index())
            .and_then(Option::as_mut)
            .ok_or(RouterError::UnknownHost(host))
    }

    /// Router of `host` together with the connection table
    pub fn split(&mut self, host: HostId) -> RouterResult<(&mut Router<S>, &mut ConnectionTable)> {
        let router = self
            .routers
            .get_mut(host.index())
            .and_then(Option::as_mut)
            .ok_or(RouterError::UnknownHost(host))?;
        Ok((router, &mut *self.connections))
    }

    /// Read-only lookup of the other routers
    pub fn peers(&self) -> ArenaPeers<'_, S> {
        ArenaPeers {
            routers: &*self.routers,
        }
    }
}

/// [`Peers`] backed by the router arena
pub struct ArenaPeers<'a, S> {
    routers: &'a [Option<Router<S>>],
}

impl<S: ForwardingStrategy> Peers<S> for ArenaPeers<'_, S> {
    fn strategy(&self, host: HostId) -> Option<&S> {
        self.routers
            .get(host.index())
            .and_then(Option::as_ref)
            .map(Router::strategy)
    }

    fn has_message(&self, host: HostId, id: &MessageId) -> bool {
        self.routers
            .get(host.index())
            .and_then(Option::as_ref)
            .is_some_and(|r| r.has_message(id))
    }
}

/// All routers of a simulation with their connections and clock
pub struct Network<S> {
    routers: Vec<Option<Router<S>>>,
    connections: ConnectionTable,
    clock: SimClock,
}

impl<S: ForwardingStrategy> Network<S> {
    /// Create `hosts` routers replicated from `prototype`
    pub fn new(prototype: &Router<S>, hosts: u32) -> Self {
        let routers = HostId::range(hosts)
            .into_iter()
            .map(|host| Some(prototype.replicate(host)))
            .collect();
        Self {
            routers,
            connections: ConnectionTable::new(),
            clock: SimClock::new(),
        }
    }

    /// Create a network from individually built routers
    ///
    /// Each router lands in the slot of its host address.
    pub fn from_routers(routers: Vec<Router<S>>) -> Self {
        let slots = routers
            .iter()
            .map(|r| r.host().index() + 1)
            .max()
            .unwrap_or(0);
        let mut arena: Vec<Option<Router<S>>> = (0..slots).map(|_| None).collect();
        for router in routers {
            let index = router.host().index();
            arena[index] = Some(router);
        }
        Self {
            routers: arena,
            connections: ConnectionTable::new(),
            clock: SimClock::new(),
        }
    }

    /// Number of router slots
    pub fn host_count(&self) -> usize {
        self.routers.len()
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Router of `host`
    pub fn router(&self, host: HostId) -> RouterResult<&Router<S>> {
        self.routers
            .get(host.index())
            .and_then(Option::as_ref)
            .ok_or(RouterError::UnknownHost(host))
    }

    /// Router of `host`, mutably
    pub fn router_mut(&mut self, host: HostId) -> RouterResult<&mut Router<S>> {
        self.routers
            .get_mut(host.index())
            .and_then(Option::as_mut)
            .ok_or(RouterError::UnknownHost(host))
    }

    /// All routers, by host address
    pub fn routers(&self) -> impl Iterator<Item = &Router<S>> {
        self.routers.iter().flatten()
    }

    /// Attach a listener to every router
    pub fn add_listener(&mut self, listener: SharedListener) {
        for router in self.routers.iter_mut().flatten() {
            router.add_listener(listener.clone());
        }
    }

    /// Hand a new message to its sender's router
    pub fn create_message(&mut self, message: Message) -> RouterResult<bool> {
        let host = message.from;
        let router = self
            .routers
            .get_mut(host.index())
            .and_then(Option::as_mut)
            .ok_or(RouterError::UnknownHost(host))?;
        router.create_new_message(
            message,
            Env {
                now: self.clock.now(),
                connections: &self.connections,
            },
        )
    }

    /// Bring up a contact opened by `initiator`
    ///
    /// Raising an already up contact again is harmless.
    pub fn connection_up(
        &mut self,
        initiator: HostId,
        responder: HostId,
        rate: f64,
    ) -> RouterResult<ConnectionId> {
        self.router(initiator)?;
        self.router(responder)?;

        let id = self
            .connections
            .open(initiator, responder, rate, self.clock.now());
        let connection = self.connections.get(id)?.clone();
        debug!(
            initiator = %initiator,
            responder = %responder,
            connection = %id,
            "Connection up"
        );
        self.with_router(initiator, |router, ctx| router.changed_connection(ctx, &connection))?;
        self.with_router(responder, |router, ctx| router.changed_connection(ctx, &connection))?;
        Ok(id)
    }

    /// Take down the contact between two hosts
    ///
    /// A transfer in flight is aborted and has to restart from zero on a
    /// later contact.
    pub fn connection_down(&mut self, a: HostId, b: HostId) -> RouterResult<()> {
        let Some(id) = self.connections.find(a, b) else {
            debug!(a = %a, b = %b, "No connection to take down");
            return Ok(());
        };
        let now = self.clock.now();
        let mut connection = self.connections.close(id)?;

        if let Some(transfer) = connection.abort_transfer() {
            let receiver = connection.other_node(transfer.from);
            self.router_mut(receiver)?
                .message_aborted(&transfer.message.id, transfer.from, now)?;
        }
        debug!(
            a = %a,
            b = %b,
            connection = %id,
            bytes = connection.bytes_transferred(),
            "Connection down"
        );
        self.with_router(a, |router, ctx| router.changed_connection(ctx, &connection))?;
        self.with_router(b, |router, ctx| router.changed_connection(ctx, &connection))?;
        Ok(())
    }

    /// Update every router once
    pub fn update(&mut self) -> RouterResult<()> {
        for index in 0..self.routers.len() {
            if self.routers[index].is_none() {
                continue;
            }
            self.with_router(HostId(index as u32), |router, ctx| router.update(ctx))?;
        }
        Ok(())
    }

    /// Advance the clock by `dt` seconds
    pub fn advance(&mut self, dt: SimTime) {
        self.clock.advance(dt);
    }

    /// Move the clock forward to `time`
    pub fn advance_to(&mut self, time: SimTime) {
        self.clock.set_time(time);
    }

    /// Update and advance in steps of `step` seconds until `end`
    pub fn run_until(&mut self, end: SimTime, step: SimTime) -> RouterResult<()> {
        while self.now() < end {
            self.update()?;
            self.advance(step);
        }
        info!(time = self.now(), "Run finished");
        Ok(())
    }

    /// Reports of every router
    pub fn reports(&self) -> Vec<RouterReport> {
        let env = Env {
            now: self.clock.now(),
            connections: &self.connections,
        };
        self.routers().map(|r| r.report(env)).collect()
    }

    /// Run `f` on the router of `host` with the rest of the network as context
    fn with_router<T>(
        &mut self,
        host: HostId,
        f: impl FnOnce(&mut Router<S>, &mut SimContext<'_, S>) -> RouterResult<T>,
    ) -> RouterResult<T> {
        let index = host.index();
        let mut router = self
            .routers
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(RouterError::UnknownHost(host))?;

        let result = {
            let _guard = HostContextGuard::new(host);
            let span = debug_span!("router", host = %host);
            let _enter = span.enter();
            let mut ctx = SimContext::new(self.clock.now(), &mut self.connections, &mut self.routers);
            f(&mut router, &mut ctx)
        };

        self.routers[index] = Some(router);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::epidemic::Epidemic;
    use crate::router::RouterConfig;

    fn network(hosts: u32) -> Network<Epidemic> {
        let prototype = Router::new(HostId(0), Arc::new(RouterConfig::default()), Epidemic::new());
        Network::new(&prototype, hosts)
    }

    #[test]
    fn test_routers_get_their_own_address() {
        let net = network(3);
        let hosts: Vec<_> = net.routers().map(Router::host).collect();
        assert_eq!(hosts, vec![HostId(0), HostId(1), HostId(2)]);
    }

    #[test]
    fn test_from_routers_leaves_gaps_empty() {
        let config = Arc::new(RouterConfig::default());
        let net = Network::from_routers(vec![
            Router::new(HostId(2), config.clone(), Epidemic::new()),
            Router::new(HostId(0), config, Epidemic::new()),
        ]);

        assert_eq!(net.host_count(), 3);
        assert!(net.router(HostId(0)).is_ok());
        assert!(matches!(net.router(HostId(1)), Err(RouterError::UnknownHost(_))));
        assert_eq!(net.router(HostId(2)).unwrap().host(), HostId(2));
    }

    #[test]
    fn test_unknown_hosts_are_rejected() {
        let mut net = network(2);
        assert!(net.connection_up(HostId(0), HostId(7), 1.0).is_err());
        assert!(
            net.create_message(Message::unicast("M", HostId(9), HostId(0), 1, 0.0))
                .is_err()
        );
        assert_eq!(net.connections().len(), 0);
    }

    #[test]
    fn test_connection_up_is_idempotent() {
        let mut net = network(2);
        let first = net.connection_up(HostId(0), HostId(1), 10.0).unwrap();
        let second = net.connection_up(HostId(1), HostId(0), 10.0).unwrap();
        assert_eq!(first, second);
        assert_eq!(net.connections().len(), 1);

        net.connection_down(HostId(0), HostId(1)).unwrap();
        assert_eq!(net.connections().len(), 0);
    }

    #[test]
    fn test_run_until_advances_clock() {
        let mut net = network(2);
        net.run_until(5.0, 1.0).unwrap();
        assert_eq!(net.now(), 5.0);
        assert_eq!(net.reports().len(), 2);
    }
}
