//! Naming and formatting rules of the Prometheus text exposition format.

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`. Invalid
/// characters become underscores, runs of underscores collapse into one,
/// trailing underscores are dropped and a leading digit gets an underscore
/// in front of it.
///
/// Munin registry names look like `system_load-load1`, which becomes
/// `system_load_load1`.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
    }

    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || c == ':' {
            c
        } else {
            '_'
        };
        if c == '_' && result.ends_with('_') {
            continue;
        }
        result.push(c);
    }

    let trimmed = result.trim_end_matches('_');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }
    trimmed.to_string()
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`, and names
/// starting with `__` are reserved, so those get a `z` in front.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());

    for (i, c) in name.chars().enumerate() {
        let valid = c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit());
        if valid {
            result.push(c);
        } else if !result.ends_with('_') {
            result.push('_');
        }
    }

    let mut result = result.trim_end_matches('_').to_string();
    if result.is_empty() {
        return "label".to_string();
    }
    if result.starts_with("__") {
        result.insert(0, 'z');
    }
    result
}

/// Build the exposed metric name: `{prefix}_{sanitized name}`.
pub fn build_metric_name(prefix: &str, name: &str) -> String {
    let name = sanitize_metric_name(name);
    if prefix.is_empty() {
        name
    } else {
        format!("{}_{}", prefix, name)
    }
}

/// Format a sample value.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Escape a label value: backslash, double quote and newline.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape `# HELP` text: backslash and newline.
pub fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format label pairs as `{a="1",b="2"}`, or nothing when empty.
pub fn format_labels<'a, I>(labels: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let parts: Vec<String> = labels
        .into_iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}
