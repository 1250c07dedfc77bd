//! Connection Manager + Cross-Server Router + Tenant Enforcement (§3
//! components 3-5, §4.3-§4.5): everything a gateway node needs to accept a
//! WebSocket connection, authorize and rate-limit its frames, and fan
//! published events out across the cluster.

pub mod enforcement;
pub mod frames;
pub mod handler;
pub mod router;
pub mod session;
pub mod state;
