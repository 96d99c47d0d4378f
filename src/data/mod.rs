pub mod models;
pub mod predictions;
