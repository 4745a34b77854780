//! The process-wide connection registry.
//!
//! Modeled on `balancer::manager::Endpoints`'s `OrderMap`-based bookkeeping:
//! producers and consumers are looked up by name and by cookie through two
//! parallel `OrderMap`s rather than one map keyed by an enum discriminant,
//! so a name collision and a cookie collision can be resolved independently
//!.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use ordermap::OrderMap;

use crate::connection::consumer::DcpConsumer;
use crate::connection::producer::DcpProducer;
use crate::connection::{Cookie, HostCallbacks};

pub enum Connection {
    Producer(Rc<RefCell<DcpProducer>>),
    Consumer(Rc<RefCell<DcpConsumer>>),
}

/// A point-in-time view of one connection, serialized for the admin
/// `/stats/dcp` endpoint.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub name: String,
    pub cookie: u64,
    pub role: &'static str,
    pub disconnect_requested: bool,
    pub buffered_items: Option<u64>,
}

impl Connection {
    pub fn cookie(&self) -> Cookie {
        match *self {
            Connection::Producer(ref p) => p.borrow().cookie(),
            Connection::Consumer(ref c) => c.borrow().cookie(),
        }
    }

    pub fn name(&self) -> String {
        match *self {
            Connection::Producer(ref p) => p.borrow().name().to_owned(),
            Connection::Consumer(ref c) => c.borrow().name().to_owned(),
        }
    }

    pub fn is_disconnect_requested(&self) -> bool {
        match *self {
            Connection::Producer(ref p) => p.borrow().is_disconnect_requested(),
            Connection::Consumer(ref c) => c.borrow().is_disconnect_requested(),
        }
    }

    /// Whether this connection's front-end thread is currently parked
    /// pending a `processPendingNotifications` wakeup.
    pub fn is_paused(&self) -> bool {
        match *self {
            Connection::Producer(ref p) => p.borrow().is_paused(),
            Connection::Consumer(ref c) => c.borrow().is_paused(),
        }
    }

    /// Wakes this connection's host I/O-complete notifier.
    pub fn wake(&self) {
        match *self {
            Connection::Producer(ref p) => p.borrow().wake(),
            Connection::Consumer(ref c) => c.borrow().wake(),
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        match *self {
            Connection::Producer(ref p) => {
                let p = p.borrow();
                ConnectionStats {
                    name: p.name().to_owned(),
                    cookie: p.cookie().0,
                    role: "producer",
                    disconnect_requested: p.is_disconnect_requested(),
                    buffered_items: None,
                }
            }
            Connection::Consumer(ref c) => {
                let c = c.borrow();
                ConnectionStats {
                    name: c.name().to_owned(),
                    cookie: c.cookie().0,
                    role: "consumer",
                    disconnect_requested: c.is_disconnect_requested(),
                    buffered_items: Some(c.buffered_items()),
                }
            }
        }
    }

    fn clone_handle(&self) -> Connection {
        match *self {
            Connection::Producer(ref p) => Connection::Producer(p.clone()),
            Connection::Consumer(ref c) => Connection::Consumer(c.clone()),
        }
    }
}

pub struct ConnectionMap {
    by_name: RefCell<OrderMap<String, Connection>>,
    by_cookie: RefCell<OrderMap<Cookie, Connection>>,
    dead: RefCell<Vec<Connection>>,
    pending: RefCell<HashSet<Cookie>>,
    connection_manager_interval: Duration,
}

impl ConnectionMap {
    pub fn new(connection_manager_interval: Duration) -> ConnectionMap {
        ConnectionMap {
            by_name: RefCell::new(OrderMap::default()),
            by_cookie: RefCell::new(OrderMap::default()),
            dead: RefCell::new(Vec::new()),
            pending: RefCell::new(HashSet::new()),
            connection_manager_interval,
        }
    }

    /// Registers a new producer connection. A name collision supersedes the
    /// prior connection (marked disconnect-requested); a cookie collision
    /// rejects the newcomer and marks the *existing* connection
    /// disconnect-requested instead.
    #[allow(clippy::too_many_arguments)]
    pub fn new_producer(
        &self,
        cookie: Cookie,
        name: String,
        flags: u32,
        flow: Box<dyn crate::flow_control::FlowControlPolicy>,
        noop_idle_timeout: Duration,
        host: Box<dyn HostCallbacks>,
        disk_backfill_queue: bool,
    ) -> Option<Rc<RefCell<DcpProducer>>> {
        if self.reject_on_cookie_collision(cookie) {
            return None;
        }
        let producer = Rc::new(RefCell::new(DcpProducer::new(
            cookie,
            name.clone(),
            flags,
            self.connection_manager_interval,
            flow,
            noop_idle_timeout,
            host,
            disk_backfill_queue,
        )));
        self.insert(name, cookie, Connection::Producer(producer.clone()));
        Some(producer)
    }

    /// Registers a new consumer connection, same collision rules as
    /// `new_producer`.
    pub fn new_consumer(
        &self,
        cookie: Cookie,
        name: String,
        ephemeral_full_policy: crate::config::EphemeralFullPolicy,
        replication_throttle_threshold: u8,
        host: Box<dyn HostCallbacks>,
    ) -> Option<Rc<RefCell<DcpConsumer>>> {
        if self.reject_on_cookie_collision(cookie) {
            return None;
        }
        let consumer = Rc::new(RefCell::new(DcpConsumer::new(
            cookie,
            name.clone(),
            self.connection_manager_interval,
            ephemeral_full_policy,
            replication_throttle_threshold,
            host,
        )));
        self.insert(name, cookie, Connection::Consumer(consumer.clone()));
        Some(consumer)
    }

    /// Returns `true` (and marks the existing connection
    /// disconnect-requested) iff `cookie` is already in use by a live
    /// connection.
    fn reject_on_cookie_collision(&self, cookie: Cookie) -> bool {
        if let Some(existing) = self.by_cookie.borrow().get(&cookie) {
            mark_disconnect_requested(existing);
            return true;
        }
        false
    }

    fn insert(&self, name: String, cookie: Cookie, conn: Connection) {
        if let Some(prior) = self.by_name.borrow().get(&name) {
            mark_disconnect_requested(prior);
        }
        self.by_name.borrow_mut().insert(name, conn.clone_handle());
        self.by_cookie.borrow_mut().insert(cookie, conn);
    }

    pub fn find_by_name(&self, name: &str) -> Option<Connection> {
        self.by_name.borrow().get(name).map(Connection::clone_handle)
    }

    pub fn find_by_cookie(&self, cookie: Cookie) -> Option<Connection> {
        self.by_cookie.borrow().get(&cookie).map(Connection::clone_handle)
    }

    /// Non-blocking: moves the connection to the dead list for
    /// `manage_connections` to reap.
    pub fn disconnect(&self, cookie: Cookie) {
        let conn = match self.by_cookie.borrow_mut().remove(&cookie) {
            Some(c) => c,
            None => return,
        };
        let stale_name = {
            let by_name = self.by_name.borrow();
            by_name.get(&conn.name()).filter(|v| v.cookie() == cookie).map(|_| conn.name())
        };
        if let Some(name) = stale_name {
            self.by_name.borrow_mut().remove(&name);
        }
        mark_disconnect_requested(&conn);
        self.dead.borrow_mut().push(conn);
    }

    pub fn dead_count(&self) -> usize {
        self.dead.borrow().len()
    }

    pub fn live_count(&self) -> usize {
        self.by_cookie.borrow().len()
    }

    /// A point-in-time snapshot of every live connection, for the admin
    /// `/stats/dcp` endpoint.
    pub fn stats_snapshot(&self) -> Vec<ConnectionStats> {
        self.by_name.borrow().values().map(Connection::stats).collect()
    }

    /// Reaps every connection in the dead list. Stream/resource teardown
    /// itself happens as each `Rc<RefCell<_>>` drops once the caller's last
    /// reference to it goes out of scope; this just clears the bookkeeping
    /// list.
    pub fn manage_connections(&self) {
        self.dead.borrow_mut().clear();
    }

    /// Wakes every connection at least once before reaping, so a parked
    /// front-end thread observes the disconnect.
    pub fn shutdown_all_connections(&self) {
        let names: Vec<String> = self.by_name.borrow().keys().cloned().collect();
        for name in names {
            if let Some(conn) = self.find_by_name(&name) {
                mark_disconnect_requested(&conn);
                self.disconnect(conn.cookie());
            }
        }
        self.manage_connections();
    }

    pub fn add_connection_to_pending(&self, cookie: Cookie) {
        self.pending.borrow_mut().insert(cookie);
    }

    /// Notifies exactly the connections that are both pending *and*
    /// currently paused; an unpaused one is silently dropped from the set
    /// without a notification, and a connection re-added mid-pass is picked
    /// up next time this is called.
    pub fn process_pending_notifications(&self, is_paused: impl Fn(Cookie) -> bool, notify: impl Fn(Cookie)) {
        let pending: Vec<Cookie> = self.pending.borrow_mut().drain().collect();
        for cookie in pending {
            if is_paused(cookie) {
                notify(cookie);
            }
        }
    }

    /// The concrete form of `process_pending_notifications` driven straight
    /// off the registry's own bookkeeping, rather than caller-supplied
    /// closures: looks each pending cookie up, checks its actual paused
    /// flag, and wakes it directly.
    pub fn drain_pending_notifications(&self) {
        self.process_pending_notifications(
            |cookie| self.find_by_cookie(cookie).map(|c| c.is_paused()).unwrap_or(false),
            |cookie| {
                if let Some(conn) = self.find_by_cookie(cookie) {
                    conn.wake();
                }
            },
        )
    }
}

fn mark_disconnect_requested(conn: &Connection) {
    match *conn {
        Connection::Producer(ref p) => p.borrow_mut().disconnect(),
        Connection::Consumer(ref c) => c.borrow_mut().disconnect(),
    }
}
