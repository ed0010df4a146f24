pub mod controller;
pub mod pipeline;
pub mod poll;
pub mod progress;
pub mod worker_client;
