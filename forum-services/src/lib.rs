pub mod config;
pub mod functional;
pub mod iiif;
pub mod interactions;
pub mod jobmanager;
pub mod mailinator;
pub mod runner;
pub mod states;
pub mod telemetry;
