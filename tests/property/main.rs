//! Property-based tests over the public API.
//!
//! Run with: `cargo test --test property`
//!
//! Case counts honour `PROPTEST_CASES`; on CI the suite defaults are used,
//! locally they are capped to keep the run short.

mod index_claims;
mod partition_cover;
mod scan_prefix;

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
}

pub(crate) fn proptest_cases(default: u32) -> u32 {
    if let Some(value) = env_u32("PROPTEST_CASES") {
        return value.max(1);
    }
    if std::env::var_os("CI").is_some() {
        return default.max(1);
    }
    default.clamp(1, 64)
}
