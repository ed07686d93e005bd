use crate::ipc::error::err;
use crate::ipc::types::Request;

/// Non-empty string param, trimmed.
pub fn param_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The authenticated owner every scoped method acts for.
pub fn require_owner(req: &Request) -> Result<String, serde_json::Value> {
    param_str(req, "userId")
        .map(str::to_string)
        .ok_or_else(|| err(&req.id, "bad_params", "missing userId", None))
}

pub fn require_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    param_str(req, key)
        .map(str::to_string)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {key}"), None))
}
