pub mod bibtex;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod fs_util;
pub mod itemtext;
pub mod output;
pub mod platform;
pub mod reshape;
pub mod session;
pub mod table;
