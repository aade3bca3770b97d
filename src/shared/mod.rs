pub mod config;
pub mod html;
pub mod logging;
pub mod models;
