pub mod config;
pub mod error;
pub mod exec;
pub mod health;
pub mod installer;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod registry;
pub mod requirements;
pub mod root;
pub mod scaffold;
pub mod stack;
pub mod strategy;
pub mod supervisor;

pub use error::{Result, StackError};
