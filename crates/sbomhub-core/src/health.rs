use axum::http::StatusCode;

/// Handler for `GET /healthz` — liveness check: the process is up and the
/// runtime answers. Readiness is service-owned: each service wires its own
/// `/readyz` against the dependencies it actually gates traffic on.
pub async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_returns_200() {
        assert_eq!(healthz().await.0, StatusCode::OK);
    }
}
