//! Demonstration `Controller` implementations used as test fixtures and to
//! give the control server something to manage out of the box. Not part of
//! the abstract contract itself — see [`crate::controller::Controller`].

pub mod host_power;
pub mod relay_board;
