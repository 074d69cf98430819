pub mod contract;
pub mod controller_state;
pub mod controllers;
pub mod deferred;
pub mod downstream;
