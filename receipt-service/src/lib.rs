//! Receipt Service - OCR receipt normalization and bank reconciliation.
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
