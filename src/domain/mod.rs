//! Domain model: value objects, the simulation entity and its state machine,
//! preview payloads, and the ports to external collaborators.

pub mod account;
pub mod clock;
pub mod external;
pub mod money;
pub mod ports;
pub mod preview;
pub mod request;
pub mod simulation;
