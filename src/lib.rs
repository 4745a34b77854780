#[macro_use]
extern crate log;
extern crate env_logger;
#[macro_use]
extern crate futures;
#[macro_use]
extern crate hyper;
extern crate byteorder;
extern crate bytes;
extern crate ordermap;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;
extern crate tacho;
#[macro_use]
extern crate tokio_core;
extern crate tokio_io;
extern crate tokio_timer;

pub mod admin;
pub mod checkpoint;
pub mod config;
pub mod connection;
pub mod driver;
pub mod engine;
pub mod error;
pub mod failover;
pub mod flow_control;
pub mod mpmc;
pub mod noop;
pub mod registry;
pub mod stream;
pub mod wire;

pub use config::DcpConfig;
pub use error::{DcpError, DcpResult};
pub use registry::ConnectionMap;
