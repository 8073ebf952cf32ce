pub mod prelude;
pub mod telemetry;
