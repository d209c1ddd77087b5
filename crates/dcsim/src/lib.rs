#![doc = include_str!("../readme.md")]

pub mod core;
pub mod extensions;
pub mod simulation;
pub mod strategies;
