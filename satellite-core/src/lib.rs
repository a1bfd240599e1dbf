//! Core data model and policy engine for the satellite payload host:
//! route table, condition evaluator, client-hit ledger, hit counter, and
//! GeoIP oracle. No HTTP or TLS dependency lives here -- that belongs to
//! `satellite-server`.

pub mod condition;
pub mod config;
pub mod counter;
pub mod error;
pub mod geo;
pub mod glob;
pub mod ip;
pub mod ja3;
pub mod ledger;
pub mod request;
pub mod route;
pub mod table;

pub use condition::{ConditionSet, ConditionSetDoc};
pub use counter::HitCounter;
pub use error::{ConfigError, EvalError, LoadError, ServeError};
pub use geo::GeoOracle;
pub use ja3::Ja3Hash;
pub use ledger::ClientLedger;
pub use request::RequestContext;
pub use route::{Artifact, OnFailure, Route, RouteDoc};
pub use table::{RouteTable, RouteTableSnapshot};
