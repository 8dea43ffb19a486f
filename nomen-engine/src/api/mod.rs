//! HTTP API handlers for the normalization engine

pub mod batch;
pub mod classification;
pub mod health;
pub mod normalization;

pub use batch::batch_routes;
pub use classification::classification_routes;
pub use health::health_routes;
pub use normalization::normalization_routes;
