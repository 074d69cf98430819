use axum::Json;

/// `GET /` — a JSON document describing the HTTP surface, for clients that
/// want to discover it at runtime rather than reading fixed documentation.
pub async fn contract() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "endpoints": [
            {"method": "GET", "path": "/"},
            {"method": "GET", "path": "/controllers"},
            {"method": "GET", "path": "/get_state"},
            {"method": "GET", "path": "/get_state/<cname>"},
            {"method": "POST", "path": "/set_state"},
            {"method": "POST", "path": "/set_state/<cname>"},
            {"method": "POST", "path": "/set_state_deferred"},
            {"method": "POST", "path": "/set_state_deferred/<cname>"},
            {"method": "GET", "path": "/list_deferred"},
            {"method": "GET", "path": "/list_deferred/<cname>"},
            {"method": "GET", "path": "/cancel_deferred"},
            {"method": "POST", "path": "/downstream"},
            {"method": "POST", "path": "/downstream/<cname>"},
        ],
        "time_format": control_protocol::TIME_FORMAT,
    }))
}
