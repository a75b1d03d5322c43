//! Key and topic naming. The `:` separator is conventional, not protocol.

pub fn sentinel(session_key: &str) -> String {
    format!("session:{}", session_key)
}

pub fn host_token(session_key: &str) -> String {
    format!("session:{}:host", session_key)
}

pub fn state(session_key: &str) -> String {
    format!("session:{}:state", session_key)
}

pub fn topic(session_key: &str) -> String {
    format!("session-updates:{}", session_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_fleet_convention() {
        assert_eq!(sentinel("abc"), "session:abc");
        assert_eq!(host_token("abc"), "session:abc:host");
        assert_eq!(state("abc"), "session:abc:state");
        assert_eq!(topic("abc"), "session-updates:abc");
    }
}
