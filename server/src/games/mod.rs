//! Games bundled with the server binary

pub mod grazer;
