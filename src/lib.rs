pub mod config;
pub mod document;
pub mod fit;
pub mod ids;
pub mod manager;
pub mod model;
pub mod repository;
pub mod validator;
