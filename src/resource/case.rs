//! Key casing helpers for wire <-> canonical field names

/// `AutoScalingGroupName` -> `auto_scaling_group_name`
///
/// An underscore is inserted before an uppercase letter that follows a
/// lowercase letter or digit, so acronyms stay together (`TargetGroupARNs`
/// -> `target_group_arns`).
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev: Option<char> = None;

    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if matches!(prev, Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }

    out
}

/// `service_namespace` -> `serviceNamespace`
pub fn snake_to_camelback(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;

    for c in key.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }

    out
}

/// `service_namespace` -> `ServiceNamespace`
pub fn snake_to_camelcap(key: &str) -> String {
    let camel = snake_to_camelback(key);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => camel,
    }
}
