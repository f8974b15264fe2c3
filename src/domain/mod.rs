// Domain layer: core models, caller identity and ports (interfaces).

pub mod identity;
pub mod model;
pub mod ports;
