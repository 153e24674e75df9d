/// Get library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Version of the pcsc-lite library the crate was built against
///
/// Taken from pkg-config at build time; `"unknown"` when pkg-config had no
/// `libpcsclite` entry.
pub fn native_version() -> &'static str {
    env!("SCARD_PCSCLITE_VERSION")
}

/// Split a packed multi-string (`a\0b\0\0`) into its non-empty segments
pub(crate) fn split_multi_string(data: &[u8]) -> Vec<String> {
    data.split(|&b| b == 0)
        .filter(|segment| !segment.is_empty())
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
        .collect()
}

/// Cut `data` at its first NUL, if any
pub(crate) fn trim_at_nul(data: &[u8]) -> &[u8] {
    match data.iter().position(|&b| b == 0) {
        Some(end) => &data[..end],
        None => data,
    }
}
