pub mod collector;

pub use collector::{Collector, unused_port};
