//! Built-in jobs available to every worker started with
//! [`JobRegistry::with_builtin_jobs`](super::JobRegistry::with_builtin_jobs).

use std::time::Duration;

use serde_json::{Value, json};

use super::JobRegistry;

/// The demo "calculation": the length of a file name, after an artificial delay.
pub fn name_length(name: &str, delay: Duration) -> usize {
    std::thread::sleep(delay);
    name.chars().count()
}

fn millis(args: &Value, key: &str) -> u64 {
    args.get(key).and_then(Value::as_u64).unwrap_or(0)
}

pub(crate) fn register(registry: &mut JobRegistry) {
    registry
        .register("echo", Ok)
        .register("sleep", |args| {
            let ms = millis(&args, "ms");
            std::thread::sleep(Duration::from_millis(ms));
            Ok(json!({ "slept_ms": ms }))
        })
        .register("fail", |args| {
            Err(args
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("job failed")
                .to_string())
        })
        .register("panic", |_| panic!("job panicked on request"))
        .register("exit", |args| {
            let code = args.get("code").and_then(Value::as_i64).unwrap_or(1);
            std::process::exit(code as i32)
        })
        .register("name_length", |args| {
            let name = args
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| "name_length needs a string 'name'".to_string())?;
            let delay = Duration::from_millis(millis(&args, "delay_ms"));
            Ok(json!(name_length(name, delay)))
        });
}
