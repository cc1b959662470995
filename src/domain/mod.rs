// Domain layer: core models and ports (interfaces).

pub mod amount;
pub mod model;
pub mod ports;
