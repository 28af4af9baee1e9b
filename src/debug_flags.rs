use std::sync::atomic::{AtomicBool, Ordering};

/// Global debug flags toggled via console.
/// When a flag is true, the module logs at info! level instead of debug!.
pub static DEBUG_HTTP: AtomicBool = AtomicBool::new(false);
pub static DEBUG_TRANSIT: AtomicBool = AtomicBool::new(false);
pub static DEBUG_WEATHER: AtomicBool = AtomicBool::new(false);
pub static DEBUG_MUSIC: AtomicBool = AtomicBool::new(false);
pub static DEBUG_INPUT: AtomicBool = AtomicBool::new(false);

/// Request flags. The console sets these and the scheduler acts on them.
pub static REQUEST_NEXT_WIDGET: AtomicBool = AtomicBool::new(false);
pub static REQUEST_REFRESH: AtomicBool = AtomicBool::new(false);
pub static REQUEST_SESSION_RESET: AtomicBool = AtomicBool::new(false);

/// Console names for the debug flags.
pub static MODULES: [(&str, &AtomicBool); 5] = [
    ("http", &DEBUG_HTTP),
    ("transit", &DEBUG_TRANSIT),
    ("weather", &DEBUG_WEATHER),
    ("music", &DEBUG_MUSIC),
    ("input", &DEBUG_INPUT),
];

pub fn is_on(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

pub fn set(flag: &AtomicBool, val: bool) {
    flag.store(val, Ordering::Relaxed);
}

pub fn toggle(flag: &AtomicBool) -> bool {
    let old = flag.load(Ordering::Relaxed);
    flag.store(!old, Ordering::Relaxed);
    !old
}

/// Read and clear a request flag.
pub fn take(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::Relaxed)
}

pub fn by_name(name: &str) -> Option<&'static AtomicBool> {
    MODULES.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

pub fn status_line() -> String {
    MODULES
        .iter()
        .map(|(name, flag)| format!("{}={}", name, if is_on(flag) { "ON" } else { "off" }))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_take() {
        assert!(by_name("music").is_some());
        assert!(by_name("imu").is_none());
        static FLAG: AtomicBool = AtomicBool::new(false);
        set(&FLAG, true);
        assert!(take(&FLAG));
        assert!(!take(&FLAG));
        assert!(status_line().contains("transit="));
    }
}
