#![allow(clippy::uninlined_format_args)]

pub mod capture;
pub mod dissect;
pub mod eap;
pub mod leap;
pub mod output;
pub mod protocol;
pub mod reassembly;
pub mod retransmit;
pub mod sanitize;
pub mod session;
pub mod tls;
pub mod tui;
