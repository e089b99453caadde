// API处理器模块

pub mod filesystem;

pub use filesystem::*;
