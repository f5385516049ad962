// Domain layer: server model types and the traits applications implement.

pub mod model;
pub mod ports;
