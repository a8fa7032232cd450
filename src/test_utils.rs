use std::sync::Once;

pub fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
}

fn is_ci() -> bool {
    std::env::var_os("CI").is_some()
}

pub fn proptest_cases(default: u32) -> u32 {
    if let Some(value) = env_u32("PROPTEST_CASES") {
        return value.max(1);
    }
    if is_ci() {
        return default.max(1);
    }
    default.clamp(1, 64)
}

/// Route `tracing` output through the test harness. `RUST_LOG`-free: the
/// level comes from `FANOUT_TEST_LOG` (default `warn`).
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let level = std::env::var("FANOUT_TEST_LOG")
            .ok()
            .and_then(|v| v.parse::<tracing::Level>().ok())
            .unwrap_or(tracing::Level::WARN);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .try_init();
    });
}
