/// Render untrusted bytes (identities, user names, notification text) as a
/// single terminal-safe line.
///
/// Invalid UTF-8 becomes U+FFFD. C0 controls, DEL and C1 controls (U+0080..
/// U+009F, which some terminals treat as CSI) are escaped as `\xNN`, so a
/// crafted identity can neither inject escape sequences nor break lines.
pub fn printable(bytes: &[u8]) -> String {
    printable_str(&String::from_utf8_lossy(bytes))
}

pub fn printable_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\x00'..='\x1F' | '\x7F' | '\u{0080}'..='\u{009F}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}
