pub mod client;
pub mod types;

pub use client::{ClientError, ControlPlane, IstioClient};
pub use types::{AccessRule, Aspect, Edge, RouteRule, RuleSet, Topology};
