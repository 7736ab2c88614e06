/*! Integration tests for Flock.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - operation: Tests for the wire format and continuation hashes
 * - source: Tests for the Source contract and the bundled memory and SQLite sources
 * - relay: Tests for the Relay contract and the bundled memory and TCP relays
 * - engine: Tests for the runtime, dispatch, replication, replay and deletion
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flock=info".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

mod context;
mod helpers;
mod source;
