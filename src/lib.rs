//! Koperasi back office
//!
//! Loan lifecycle, installment bookkeeping and multi-channel payment
//! reminders for a savings-and-loan cooperative.

pub mod calendar;
pub mod config;
pub mod customer;
pub mod db;
pub mod error;
pub mod handlers;
pub mod loan;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod store;
