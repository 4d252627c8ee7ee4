//! StimaSense batch tooling: a planned-outage notice fetcher and an
//! outage-probability model trainer.

pub mod config;
pub mod fetch;
pub mod logging;
pub mod notices;
pub mod output;
pub mod training;
