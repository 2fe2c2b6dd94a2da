//! Root greeting.

/// `GET /welcome`
pub async fn welcome() -> &'static str {
    "welcome"
}
