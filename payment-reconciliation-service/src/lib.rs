//! Payment Reconciliation Service - matches gateway payments to open invoices.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
pub mod workers;
