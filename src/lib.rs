pub mod chip;
pub mod clock;
pub mod config;
pub mod traits;
pub mod controller;
pub mod statistics;
pub mod scheduler;
pub mod report;
pub mod results;
pub mod transmit;
pub mod receive;
pub mod lo_sweep;
pub mod mac;
pub mod sim;
