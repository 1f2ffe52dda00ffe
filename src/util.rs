const QUEUE_CAPACITY: &str = "RELAY_QUEUE_CAPACITY";

pub fn get_queue_capacity() -> Option<usize> {
    parse_env(QUEUE_CAPACITY)
}

const BATCH_INTERVAL_MS: &str = "RELAY_BATCH_INTERVAL_MS";

pub fn get_batch_interval_ms() -> Option<u64> {
    parse_env(BATCH_INTERVAL_MS)
}

const BATCH_MAX_BYTES: &str = "RELAY_BATCH_MAX_BYTES";

pub fn get_batch_max_bytes() -> Option<usize> {
    parse_env(BATCH_MAX_BYTES)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}
