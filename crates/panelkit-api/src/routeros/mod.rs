// MikroTik RouterOS API
//
// Binary sentence protocol over raw TCP. The codec and sentence modules are
// pure transforms; `connection` adds framing over an async stream, `auth`
// the login flows, and `client` the TCP connect.

pub mod auth;
pub mod client;
pub mod codec;
pub mod connection;
pub mod sentence;

pub use auth::{LoginMethod, challenge_response};
pub use client::{DEFAULT_API_PORT, RouterClient, RouterSession};
pub use connection::{Connection, Response};
pub use sentence::{Attributes, Command, Reply};

/// Parse a RouterOS duration such as `1w2d3h4m5s` into seconds.
///
/// Newer firmware may append milliseconds (`5s120ms`); those are dropped.
/// Unknown units yield `None`.
pub fn parse_duration(text: &str) -> Option<u64> {
    let mut total = 0_u64;
    let mut number = 0_u64;
    let mut has_digits = false;
    let mut chars = text.trim().chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(digit) = c.to_digit(10) {
            number = number.checked_mul(10)?.checked_add(u64::from(digit))?;
            has_digits = true;
            continue;
        }
        if !has_digits {
            return None;
        }
        let factor = match c {
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0
            }
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = total.checked_add(number.checked_mul(factor)?)?;
        number = 0;
        has_digits = false;
    }

    // A bare number is seconds.
    if has_digits {
        total = total.checked_add(number)?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::parse_duration;

    #[test]
    fn parses_router_durations() {
        assert_eq!(parse_duration("1w2d3h4m5s"), Some(788_645));
        assert_eq!(parse_duration("45s"), Some(45));
        assert_eq!(parse_duration("3h12m5s250ms"), Some(11_525));
        assert_eq!(parse_duration("90"), Some(90));
        assert_eq!(parse_duration("1y"), None);
        assert_eq!(parse_duration(""), Some(0));
    }
}
