use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::{Callable, arg_str};

/// The static built-in dispatch table.
pub(super) fn table() -> &'static HashMap<String, Callable> {
    static TABLE: OnceLock<HashMap<String, Callable>> = OnceLock::new();
    TABLE.get_or_init(build)
}

fn build() -> HashMap<String, Callable> {
    let mut map = HashMap::new();

    // -- predicates ---------------------------------------------------------

    map.insert(
        "is_private_ip".to_string(),
        Callable::Predicate(Arc::new(|args| {
            let Some(raw) = arg_str(args, 0) else {
                return Ok(false);
            };
            let Ok(ip) = raw.parse::<IpAddr>() else {
                return Ok(false);
            };
            Ok(match ip {
                IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
                IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local(),
            })
        })),
    );

    map.insert(
        "is_local_ip".to_string(),
        Callable::Predicate(Arc::new(|args| {
            let Some(raw) = arg_str(args, 0) else {
                return Ok(false);
            };
            Ok(raw
                .parse::<IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false))
        })),
    );

    map.insert(
        "is_empty".to_string(),
        Callable::Predicate(Arc::new(|args| {
            Ok(arg_str(args, 0).map(|s| s.is_empty()).unwrap_or(true))
        })),
    );

    // -- transforms ---------------------------------------------------------

    map.insert(
        "now".to_string(),
        Callable::Transform(Arc::new(|_args| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Ok(json!(secs))
        })),
    );

    map.insert(
        "to_upper".to_string(),
        Callable::Transform(Arc::new(|args| {
            let s = arg_str(args, 0)
                .ok_or_else(|| anyhow::anyhow!("to_upper: missing argument"))?;
            Ok(json!(s.to_uppercase()))
        })),
    );

    map.insert(
        "to_lower".to_string(),
        Callable::Transform(Arc::new(|args| {
            let s = arg_str(args, 0)
                .ok_or_else(|| anyhow::anyhow!("to_lower: missing argument"))?;
            Ok(json!(s.to_lowercase()))
        })),
    );

    map.insert(
        "concat".to_string(),
        Callable::Transform(Arc::new(|args| {
            let joined: String = (0..args.len())
                .filter_map(|i| arg_str(args, i))
                .collect::<Vec<_>>()
                .join("");
            Ok(json!(joined))
        })),
    );

    map.insert(
        "sha256_hex".to_string(),
        Callable::Transform(Arc::new(|args| {
            let s = arg_str(args, 0)
                .ok_or_else(|| anyhow::anyhow!("sha256_hex: missing argument"))?;
            let digest = Sha256::digest(s.as_bytes());
            Ok(Value::String(
                digest.iter().map(|b| format!("{b:02x}")).collect(),
            ))
        })),
    );

    map
}
