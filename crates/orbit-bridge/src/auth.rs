use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Authority the presented key carries, attached as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Admin,
    User,
    Worker,
}

/// Gate for mutating endpoints: the presented key must equal the
/// configured access key. No configured key means nothing passes.
pub async fn gate_mutating(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    let Some(expected) = &state.access_key else {
        return Ok(unauthorised());
    };
    let Some(presented) = extract_key(&req) else {
        return Ok(unauthorised());
    };
    if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        return Ok(unauthorised());
    }

    // The admin tier additionally requires the pool's admin key; the
    // access key alone acts at user authority.
    let tier = match state.config() {
        Ok(config) if constant_time_eq(presented.as_bytes(), config.admin_key.as_bytes()) => {
            Tier::Admin
        }
        _ => Tier::User,
    };
    req.extensions_mut().insert(tier);
    Ok(next.run(req).await)
}

/// Gate for `info` reads: any of the three tier keys is accepted, as is
/// the access key itself.
pub async fn gate_info(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    let Some(presented) = extract_key(&req) else {
        return Ok(unauthorised());
    };
    let presented = presented.as_bytes();

    let mut tier = None;
    if let Ok(config) = state.config() {
        if constant_time_eq(presented, config.admin_key.as_bytes()) {
            tier = Some(Tier::Admin);
        } else if matches!(&config.write_key,
            Some(key) if constant_time_eq(presented, key.as_bytes()))
        {
            tier = Some(Tier::User);
        } else if matches!(&config.readonly_key,
            Some(key) if constant_time_eq(presented, key.as_bytes()))
        {
            tier = Some(Tier::Worker);
        }
    }
    if tier.is_none() {
        if let Some(key) = &state.access_key {
            if constant_time_eq(presented, key.as_bytes()) {
                tier = Some(Tier::User);
            }
        }
    }

    let Some(tier) = tier else {
        return Ok(unauthorised());
    };
    req.extensions_mut().insert(tier);
    Ok(next.run(req).await)
}

fn extract_key(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Length-independent comparison: a timing side channel must not leak
/// how much of the key matched.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().min(b.len()) {
        diff |= (a[i] ^ b[i]) as usize;
    }
    diff == 0
}

fn unauthorised() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "missing or invalid API key"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_match() {
        assert!(constant_time_eq(b"secret", b"secret"));
    }

    #[test]
    fn different_lengths_do_not_match() {
        assert!(!constant_time_eq(b"secret", b"secret1"));
        assert!(!constant_time_eq(b"", b"x"));
    }

    #[test]
    fn every_single_bit_flip_fails() {
        let key = b"0123456789abcdef";
        for byte in 0..key.len() {
            for bit in 0..8 {
                let mut flipped = key.to_vec();
                flipped[byte] ^= 1 << bit;
                assert!(!constant_time_eq(key, &flipped));
            }
        }
    }
}
