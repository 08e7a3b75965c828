/// Whether a network interface with this name exists on the host.
#[cfg(target_os = "linux")]
pub fn interface_exists(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && std::path::Path::new("/sys/class/net").join(name).exists()
}

// No cheap portable lookup; tshark reports a bad interface itself.
#[cfg(not(target_os = "linux"))]
pub fn interface_exists(name: &str) -> bool {
    !name.is_empty()
}
