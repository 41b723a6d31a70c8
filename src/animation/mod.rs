// Animation module - audio-independent facial animation sources

pub mod blink;

pub use blink::{BlinkMachine, BlinkScheduler, BlinkTimings, EyeState};
