pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod fingerprint;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod transport;
pub mod worker;
