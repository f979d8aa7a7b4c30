#![no_main]

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::OnceLock;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use tokio::io::BufReader;

use edgecache::proxy::codec::fuzzing::parse_response;

fn runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("build tokio runtime")
    })
}

fuzz_target!(|data: &[u8]| {
    // First byte picks the body limit so both the cap and the framing get exercised.
    let Some((&selector, payload)) = data.split_first() else {
        return;
    };
    let max_body_bytes = (selector as usize) * 64;
    let peer = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8081));

    runtime().block_on(async {
        let mut reader = BufReader::new(payload);
        parse_response(
            &mut reader,
            peer,
            Duration::from_millis(10),
            8 * 1024,
            max_body_bytes,
        )
        .await;
    });
});
