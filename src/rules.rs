//! Static business-rule tables: status transitions, the deletion window,
//! and certificate validity durations.

/// Allowed status transitions, keyed by the current status. A status with
/// no entry is unrestricted, which keeps terminal or ad-hoc statuses
/// editable without touching this table.
pub fn allowed_transitions(from: &str) -> Option<&'static [&'static str]> {
    match from {
        "Đang học" => Some(&["Đã tốt nghiệp", "Đã thôi học", "Tạm dừng học"]),
        "Đã tốt nghiệp" => Some(&["Đã thôi học"]),
        _ => None,
    }
}

pub fn transition_allowed(from: &str, to: &str) -> bool {
    match allowed_transitions(from) {
        Some(targets) => targets.contains(&to),
        None => true,
    }
}

/// Records may only be deleted this many minutes after creation when the
/// deletion-window rule is active.
pub const DELETE_WINDOW_MINUTES: i64 = 30;

pub fn delete_window_open(elapsed_minutes: i64) -> bool {
    elapsed_minutes <= DELETE_WINDOW_MINUTES
}

/// Certificate validity in days, keyed by the stated reason. Unrecognized
/// reasons get the short default window.
pub fn certificate_validity_days(reason: &str) -> i64 {
    match reason {
        "Xác nhận đang học để vay vốn ngân hàng" => 180,
        "Xác nhận làm thủ tục tạm hoãn nghĩa vụ quân sự" => 365,
        "Xác nhận làm hồ sơ xin việc / thực tập" => 90,
        _ => 30,
    }
}
