//! The admin HTTP surface, adapted
//! from `admin.rs`'s `hyper::server::Service` shape: `/metrics` exports the
//! `tacho` Prometheus text report, `/stats/dcp` returns a JSON snapshot of
//! the connection registry.

use std::cell::RefCell;
use std::rc::Rc;

use futures::{future, Future};
use hyper::header::ContentLength;
use hyper::server::{Request, Response, Service};
use hyper::{self, Get, StatusCode};

use crate::registry::ConnectionMap;

#[derive(Clone)]
pub struct Admin {
    prometheus: Rc<RefCell<String>>,
    registry: Rc<ConnectionMap>,
}

impl Admin {
    pub fn new(prometheus: Rc<RefCell<String>>, registry: Rc<ConnectionMap>) -> Admin {
        Admin { prometheus, registry }
    }
}

impl Service for Admin {
    type Request = Request;
    type Response = Response;
    type Error = hyper::Error;
    type Future = Box<dyn Future<Item = Response, Error = hyper::Error>>;

    fn call(&self, req: Request) -> Self::Future {
        match (req.method(), req.path()) {
            (&Get, "/metrics") => {
                let body = self.prometheus.borrow().clone();
                let rsp = Response::new()
                    .with_status(StatusCode::Ok)
                    .with_header(ContentLength(body.len() as u64))
                    .with_body(body);
                Box::new(future::ok(rsp))
            }
            (&Get, "/stats/dcp") => {
                let snapshot = DcpStatsSnapshot {
                    live_connections: self.registry.live_count(),
                    dead_connections: self.registry.dead_count(),
                    connections: self.registry.stats_snapshot(),
                };
                let body = serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_owned());
                let rsp = Response::new()
                    .with_status(StatusCode::Ok)
                    .with_header(ContentLength(body.len() as u64))
                    .with_body(body);
                Box::new(future::ok(rsp))
            }
            _ => Box::new(future::ok(Response::new().with_status(StatusCode::NotFound))),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct DcpStatsSnapshot {
    live_connections: usize,
    dead_connections: usize,
    connections: Vec<crate::registry::ConnectionStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Exercises the same snapshot the `/stats/dcp` handler serializes,
    /// without going through the hyper `Service` machinery (the handler
    /// itself is a thin `serde_json::to_string` over this).
    #[test]
    fn stats_snapshot_serializes_empty_registry() {
        let registry = Rc::new(ConnectionMap::new(Duration::from_secs(2)));
        let snapshot = DcpStatsSnapshot {
            live_connections: registry.live_count(),
            dead_connections: registry.dead_count(),
            connections: registry.stats_snapshot(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"liveConnections\":0"));
        assert!(json.contains("\"connections\":[]"));
    }

    #[test]
    fn admin_clones_share_the_same_registry() {
        let registry = Rc::new(ConnectionMap::new(Duration::from_secs(2)));
        let admin = Admin::new(Rc::new(RefCell::new(String::new())), registry.clone());
        let also = admin.clone();
        registry.add_connection_to_pending(crate::connection::Cookie(1));
        // Both handles see the same underlying registry state.
        assert_eq!(also.registry.live_count(), admin.registry.live_count());
    }
}
