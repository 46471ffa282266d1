pub mod processor;

pub use processor::OutboxProcessor;
