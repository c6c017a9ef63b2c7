//! Helpers for tests of services built on corekit.

use std::time::Duration;

use rand::Rng;

use crate::apikit::ApiError;
use crate::errors::{wrap, Error};
use crate::kv;
use crate::ping::Pinger;

const WAIT_ATTEMPTS: u32 = 10;

/// Asserts that `err` carries an [`ApiError`] with the same code and sub-code
/// as `expected`, at any depth of its chain.
///
/// # Panics
///
/// Panics if no `ApiError` is found or if it differs from `expected`.
#[track_caller]
pub fn assert_api_error(err: &Error, expected: &ApiError) {
    let Some(actual) = err.find::<ApiError>() else {
        panic!("expected api error {expected:?}, got {err}");
    };
    assert_eq!(
        (actual.code, actual.sub_code),
        (expected.code, expected.sub_code),
        "api error mismatch: {err}"
    );
}

/// Pings until the dependency answers or `timeout` elapses, splitting the
/// timeout evenly over a fixed number of attempts.
///
/// # Errors
///
/// Returns the last ping error, wrapped with the attempt count.
pub async fn wait(pinger: &dyn Pinger, timeout: Duration) -> Result<(), Error> {
    let step = timeout / WAIT_ATTEMPTS;
    let mut last = None;
    for attempt in 1..=WAIT_ATTEMPTS {
        match pinger.ping().await {
            Ok(()) => return Ok(()),
            Err(err) => last = Some(err),
        }
        if attempt < WAIT_ATTEMPTS {
            tokio::time::sleep(step).await;
        }
    }
    let err = last.unwrap_or_else(|| Error::msg("no ping attempts made"));
    Err(wrap(err, kv!["component", "testkit", "attempts", WAIT_ATTEMPTS]))
}

/// Random lowercase hex string of `len` characters.
#[must_use]
pub fn generate_string(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(HEX[rng.random_range(0..HEX.len())]))
        .collect()
}
