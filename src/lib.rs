#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod byte_slice_cursor;
pub mod constants;
pub mod detect_policy;
pub mod device_config;
pub mod event_logger;
#[cfg(target_os = "none")]
pub mod nrf_nvmc;
pub mod nrf_timebase;
pub mod nvm;
pub mod nvm_logger;
pub mod re_exports;
pub mod sensebe_rx;
pub mod services;
pub mod timebase;
pub mod tssp_detect;
