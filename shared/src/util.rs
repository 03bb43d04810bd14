/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a new opaque event/entity ID (UUID v4).
///
/// Used for envelope event IDs and dead-letter entry keys; entity IDs
/// (vehicle, ride, rider) are assigned by their originating service.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
