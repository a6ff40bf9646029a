#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod reassess;
pub mod report;
pub mod simulate;
pub mod table;
pub mod types;
