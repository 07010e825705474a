pub mod error;
pub mod inst;
pub mod label;
pub mod memory;
pub mod head;
pub mod stack;
pub mod thread;
pub mod fault;
pub mod environment;
pub mod mutation;
pub mod config;
pub mod divide;
pub mod hardware;
pub mod dispatch;
pub mod state;
pub mod population;
pub mod metrics;
