pub mod dto;
pub mod error;
pub mod manifest;
pub mod util;
