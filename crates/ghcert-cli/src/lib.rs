// ABOUTME: Library for the ghcert CLI
// ABOUTME: Login flow, loopback certificate delivery, status inspection and policy signing

pub mod agent;
pub mod config;
pub mod login;
pub mod loopback;
pub mod output;
pub mod policy;
pub mod status;

pub use config::ClientConfig;
pub use login::{run as login, LoginOptions, LoginReport};
pub use loopback::{
    obtain_certificate, read_manual_certificate, wait_for_certificate, HttpStatusProbe,
    LoopbackError, LoopbackStatus, ManualEntry, PollOutcome, PollSettings, StatusProbe,
};
pub use output::CliOutput;
