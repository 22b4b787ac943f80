use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time;

pub(crate) async fn sleep_ms(ms: u64) {
    time::sleep(time::Duration::from_millis(ms)).await;
}

pub(crate) fn time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
