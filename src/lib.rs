#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod constant;
pub mod disk;
pub mod err;
pub mod usdhc;

pub use err::SdError;
