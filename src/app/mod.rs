// taillight - app/mod.rs
//
// Application layer: the engine, its background workers, and the message
// bus connecting them.

pub mod engine;
pub mod export;
pub mod line_reader;
pub mod messages;
pub mod watcher;
