//! Path node encoding for the three wire/storage representations a
//! control plane exchanges instrument paths in (spec §6). These are
//! boundary-only utilities with no RT-path callers; nothing here runs
//! on the render path.
//!
//! A path is a list of node names (`Vec<String>`), never a single
//! string with embedded separators — callers own splitting/joining the
//! nodes however their storage layer wants. The three encodings differ
//! only in how a node's "special" bytes are escaped before being
//! joined with `/`.

const LSCP_UNRESERVED: &str =
    "!#$%&()*+,-.:;<=>?@[]^_`{}|~0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// POSIX form: `%` doubled to `%%`, `/` escaped to `%2f` within a node,
/// nodes joined with `/`.
pub fn to_posix(nodes: &[String]) -> String {
    if nodes.is_empty() {
        return "/".to_string();
    }
    let mut result = String::new();
    for node in nodes {
        let escaped = node.replace('%', "%%").replace('/', "%2f");
        result.push('/');
        result.push_str(&escaped);
    }
    result
}

/// Inverse of [`to_posix`]: split on `/`, decode `%%` and `%HH`
/// sequences. A malformed escape is replaced with `?` rather than
/// rejected, matching the original decoder's recovery behavior.
pub fn from_posix(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|node| !node.is_empty())
        .map(decode_posix_node)
        .collect()
}

fn decode_posix_node(node: &str) -> String {
    let bytes = node.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i] as char);
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'%') => {
                out.push('%');
                i += 2;
            }
            Some(_) if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => out.push(byte as char),
                    Err(_) => out.push('?'),
                }
                i += 3;
            }
            _ => {
                out.push('?');
                i += 1;
            }
        }
    }
    out
}

/// Database form: `/` within a node becomes a NUL byte, nodes joined
/// with `/`. Used where instrument paths are stored as single strings
/// in a flat namespace that reserves `/` as its own separator.
pub fn to_db_path(nodes: &[String]) -> String {
    if nodes.is_empty() {
        return "/".to_string();
    }
    let mut result = String::new();
    for node in nodes {
        result.push('/');
        result.push_str(&node.replace('/', "\0"));
    }
    result
}

/// Inverse of [`to_db_path`].
pub fn from_db_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|node| !node.is_empty())
        .map(|node| node.replace('\0', "/"))
        .collect()
}

/// LSCP form: every byte outside the permitted ASCII set is escaped as
/// `\xHH` (lowercase hex).
pub fn to_lscp(nodes: &[String]) -> String {
    if nodes.is_empty() {
        return "/".to_string();
    }
    let mut result = String::new();
    for node in nodes {
        result.push('/');
        for &byte in node.as_bytes() {
            if byte.is_ascii() && LSCP_UNRESERVED.as_bytes().contains(&byte) {
                result.push(byte as char);
            } else {
                result.push_str(&format!("\\x{:02x}", byte));
            }
        }
    }
    result
}
