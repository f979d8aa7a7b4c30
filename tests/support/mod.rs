#![allow(dead_code)]

mod dirs;
mod harness;
mod http_utils;
mod logging;
mod net;
mod upstream;

pub use dirs::TestDirs;
pub use harness::{EdgeHarness, EdgeHarnessBuilder, OriginHarness, test_settings};
pub use http_utils::{RawResponse, send_raw, send_request};
pub use logging::LogCapture;
pub use net::{find_free_port, unreachable_addr, wait_for_listener};
pub use upstream::MockOrigin;
