//! Canned account worker used by the integration tests.
//!
//! Speaks the line protocol on stdin/stdout and serves deterministic records.
//! Behaviour is selected through environment variables:
//!
//! - `FIXTURE_MODE`: `normal` (default), `bad_version`, `silent_handshake`,
//!   `crash_on_call`
//! - `FIXTURE_EMPTY`: comma separated kinds answered with no records
//! - `FIXTURE_FAIL`: comma separated kinds answered with an error
//! - `FIXTURE_DELAY_MS`: delay before answering data operations
//!
//! The `echo` operation reports the worker's pid and selected environment.

use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::time::Duration;

const CATALOG_PAGE_SIZE: usize = 40;
const CATALOG_PAGES: usize = 5;

struct Settings {
    mode: String,
    empty: Vec<String>,
    failing: Vec<String>,
    delay: Duration,
}

impl Settings {
    fn from_env() -> Self {
        let list = |name: &str| -> Vec<String> {
            std::env::var(name)
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            mode: std::env::var("FIXTURE_MODE").unwrap_or_else(|_| "normal".to_string()),
            empty: list("FIXTURE_EMPTY"),
            failing: list("FIXTURE_FAIL"),
            delay: Duration::from_millis(
                std::env::var("FIXTURE_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            ),
        }
    }
}

fn main() {
    let settings = Settings::from_env();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(_) => continue,
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let operation = request.get("operation").and_then(Value::as_str).unwrap_or_default();
        let parameters = request.get("parameters").cloned().unwrap_or(Value::Null);

        let response = match handle(&settings, operation, &parameters) {
            Some(Ok(result)) => json!({"id": id, "result": result}),
            Some(Err(message)) => json!({"id": id, "error": {"code": 500, "message": message}}),
            None => continue,
        };

        if writeln!(stdout, "{}", response).is_err() || stdout.flush().is_err() {
            break;
        }
    }
}

fn handle(settings: &Settings, operation: &str, parameters: &Value) -> Option<Result<Value, String>> {
    match operation {
        "initialize" => match settings.mode.as_str() {
            "silent_handshake" => None,
            "bad_version" => Some(Ok(json!({"protocolVersion": "1999-01-01"}))),
            _ => Some(Ok(json!({
                "protocolVersion": "2024-11-05",
                "server": {"name": "fixture-worker"}
            }))),
        },
        "echo" => Some(Ok(json!({
            "pid": std::process::id(),
            "parameters": parameters,
            "credential": std::env::var("PRIVATE_API_KEY").ok(),
            "read_only": std::env::var("READ_ONLY").ok(),
        }))),
        op if op.starts_with("get_") => {
            if settings.mode == "crash_on_call" {
                std::process::exit(3);
            }
            std::thread::sleep(settings.delay);

            let kind = &op["get_".len()..];
            if settings.failing.iter().any(|k| k == kind) {
                return Some(Err(format!("{} temporarily unavailable", kind)));
            }
            if settings.empty.iter().any(|k| k == kind) {
                return Some(Ok(json!({"data": [], "links": {"next": null}})));
            }
            if kind == "catalog_items" {
                return Some(Ok(catalog_page(parameters)));
            }
            let data: Vec<Value> = (1..=3)
                .map(|i| json!({"id": format!("{}-{}", kind, i), "name": format!("{} {}", kind, i)}))
                .collect();
            Some(Ok(json!({"data": data, "links": {"next": null}})))
        }
        other => Some(Err(format!("unknown operation '{}'", other))),
    }
}

fn catalog_page(parameters: &Value) -> Value {
    let page: usize = parameters
        .get("page_cursor")
        .and_then(Value::as_str)
        .and_then(|cursor| cursor.strip_prefix("page-"))
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(1)
        .max(1);

    let start = (page - 1) * CATALOG_PAGE_SIZE;
    let data: Vec<Value> = (start..start + CATALOG_PAGE_SIZE)
        .map(|i| json!({"id": format!("sku-{}", i), "title": format!("Product {}", i)}))
        .collect();
    let next = (page < CATALOG_PAGES).then(|| format!("page-{}", page + 1));
    json!({"data": data, "links": {"next": next}})
}
