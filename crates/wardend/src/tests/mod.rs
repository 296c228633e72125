//! Test suites for the Warden supervisor.

mod support;
