// Domain layer: records, candidates, rows and the ports the pipelines are built on.

pub mod model;
pub mod ports;
