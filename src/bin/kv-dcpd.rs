//! Boots a standalone DCP engine process: loads configuration, starts the
//! admin HTTP surface, and drives the connection-manager tick loop. The
//! actual memcached-framed socket listener that hands connections to this
//! engine is the out-of-scope binary protocol layer; this binary
//! exists so the crate has a runnable entry point exercising the ambient
//! stack end to end, with an admin thread plus a driving thread joined at
//! exit.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate env_logger;
extern crate futures;
extern crate hyper;
extern crate kv_dcp;
extern crate tokio_core;
extern crate tokio_timer;

use std::cell::RefCell;
use std::fs;
use std::io::Read;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use clap::{App, Arg};
use futures::Stream;
use hyper::server::Http;
use tokio_core::net::TcpListener;
use tokio_core::reactor::Core;

use kv_dcp::admin::Admin;
use kv_dcp::config::{self, DcpConfig};
use kv_dcp::registry::ConnectionMap;

static CONFIG_PATH_ARG: &str = "PATH";

fn mk_app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::with_name(CONFIG_PATH_ARG)
                .required(true)
                .index(1)
                .help("Config file path."),
        )
}

fn load_config(path: &str) -> DcpConfig {
    let mut text = String::new();
    fs::File::open(path)
        .and_then(|mut f| f.read_to_string(&mut text))
        .expect("could not read config file");
    config::from_str(&text).expect("configuration error")
}

fn main() {
    drop(env_logger::init());

    let opts = mk_app().get_matches();
    let config_path = opts.value_of(CONFIG_PATH_ARG).unwrap();
    let config = load_config(config_path);

    let registry = Rc::new(ConnectionMap::new(Duration::from_secs(config.connection_manager_interval_secs)));
    let prometheus = Rc::new(RefCell::new(String::new()));

    let _admin_thread = config.admin.as_ref().and_then(|admin_cfg| admin_cfg.addr).map(|addr| {
        let registry = registry.clone();
        let prometheus = prometheus.clone();
        thread::Builder::new()
            .name("admin".into())
            .spawn(move || {
                let mut core = Core::new().expect("admin reactor");
                let handle = core.handle();
                let admin = Admin::new(prometheus, registry);
                let listener = TcpListener::bind(&addr, &handle).expect("could not bind admin http server");
                info!("admin listening on {}", addr);
                let http = Http::new();
                let handle2 = handle.clone();
                let accept = listener
                    .incoming()
                    .for_each(move |(socket, peer)| {
                        http.bind_connection(&handle2, socket, peer, admin.clone());
                        Ok(())
                    })
                    .map_err(|e| error!("admin accept error: {}", e));
                core.run(accept).ok();
            })
            .expect("could not spawn admin thread")
    });

    info!("kv-dcpd ready; connection-manager interval {}s", config.connection_manager_interval_secs);

    // The connection-manager tick: periodically reaps dead connections and
 // drains pending notifications (`manageConnections`,
    // `processPendingNotifications`). The front-end I/O loop that actually
    // reads/writes DCP frames off sockets is driven per-connection by
    // `SnapshotProcessorTask`/`DcpConsumer::step`, wired in by the
 // out-of-scope memcached listener.
    let tick = Duration::from_secs(config.connection_manager_interval_secs.max(1));
    loop {
        thread::sleep(tick);
        registry.manage_connections();
        registry.drain_pending_notifications();
    }
}
