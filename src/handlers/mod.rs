//! API handlers for the Koperasi back office

pub mod health;
pub mod loan;
pub mod notification;
pub mod scheduler;

pub use health::*;
pub use loan::*;
pub use notification::*;
pub use scheduler::*;
