//! Built-in Rhai functions available to every script document.

use rhai::{Dynamic, Engine, EvalAltResult, NativeCallContext};

/// Output bound for padding when the engine sets no string size limit.
const MAX_PADDED_BYTES: usize = 16 * 1024 * 1024;

/// Registers all built-in functions in the Rhai engine.
pub fn register_builtin_functions(engine: &mut Engine) {
    register_uuid_functions(engine);
    register_time_functions(engine);
    register_parsing_functions(engine);
    register_string_functions(engine);
}

fn register_uuid_functions(engine: &mut Engine) {
    // UUID v4 generation
    engine.register_fn("uuid", || uuid::Uuid::new_v4().to_string());
}

fn register_time_functions(engine: &mut Engine) {
    // Current timestamp in ISO 8601 format
    engine.register_fn("timestamp", || chrono::Utc::now().to_rfc3339());

    // Unix timestamp in seconds
    engine.register_fn("unix_timestamp", || chrono::Utc::now().timestamp());

    // Unix timestamp in milliseconds
    engine.register_fn("unix_timestamp_ms", || {
        chrono::Utc::now().timestamp_millis()
    });
}

fn register_parsing_functions(engine: &mut Engine) {
    // Unparseable input yields () so scripts can test with `type_of`
    engine.register_fn("parse_int", |s: &str| -> Dynamic {
        s.trim().parse::<i64>().map(Dynamic::from).unwrap_or(Dynamic::UNIT)
    });

    engine.register_fn("parse_float", |s: &str| -> Dynamic {
        s.trim().parse::<f64>().map(Dynamic::from).unwrap_or(Dynamic::UNIT)
    });

    engine.register_fn("parse_bool", |s: &str| -> Dynamic {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Dynamic::from(true),
            "false" | "0" | "no" | "off" => Dynamic::from(false),
            _ => Dynamic::UNIT,
        }
    });
}

fn register_string_functions(engine: &mut Engine) {
    engine.register_fn("to_lowercase", |s: &str| s.to_lowercase());

    engine.register_fn("to_uppercase", |s: &str| s.to_uppercase());

    // Character-wise reversal
    engine.register_fn("reverse", |s: &str| s.chars().rev().collect::<String>());

    engine.register_fn("str_contains", |s: &str, pattern: &str| s.contains(pattern));

    engine.register_fn("is_blank", |s: &str| s.trim().is_empty());

    // Treats () and blank strings alike
    engine.register_fn("is_blank", |_: ()| true);

    engine.register_fn("substring", |s: &str, start: i64, len: i64| -> String {
        let start = start.max(0) as usize;
        let len = len.max(0) as usize;
        s.chars().skip(start).take(len).collect()
    });

    engine.register_fn("pad_left", pad_left);
}

/// Left-pads `s` with `fill` to `width` characters.
///
/// The padded size is checked against the engine's string limit before
/// anything is allocated.
fn pad_left(
    ctx: NativeCallContext,
    s: &str,
    width: i64,
    fill: char,
) -> Result<String, Box<EvalAltResult>> {
    let count = s.chars().count();
    let width = usize::try_from(width).unwrap_or(0);
    if count >= width {
        return Ok(s.to_string());
    }

    let limit = match ctx.engine().max_string_size() {
        0 => MAX_PADDED_BYTES,
        max => max,
    };
    let padding = width - count;
    let bytes = padding
        .checked_mul(fill.len_utf8())
        .and_then(|n| n.checked_add(s.len()));
    match bytes {
        Some(bytes) if bytes <= limit => {}
        _ => {
            return Err(EvalAltResult::ErrorDataTooLarge(
                format!("pad_left to width {width}"),
                ctx.position(),
            )
            .into())
        }
    }

    let mut padded = String::with_capacity(padding * fill.len_utf8() + s.len());
    padded.extend(std::iter::repeat(fill).take(padding));
    padded.push_str(s);
    Ok(padded)
}
