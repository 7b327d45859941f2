/// Shared helpers for response handling across providers
use chrono::Utc;

/// Create a preview string for error logging (truncates long responses on a char boundary)
pub fn create_error_preview(response: &str, max_len: usize) -> String {
    if response.len() > max_len {
        let mut end = max_len;
        while !response.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &response[..end])
    } else {
        response.to_string()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Keep at most the last `n` items of a series
pub fn tail<T>(mut items: Vec<T>, n: usize) -> Vec<T> {
    if items.len() > n {
        items.drain(..items.len() - n);
    }
    items
}
