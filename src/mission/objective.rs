//! Template substitution for task objectives.
//!
//! A task's `objective` string may reference `{{vars.NAME}}`,
//! `{{inputs.NAME}}`, and, inside an iterated task, `{{item.FIELD}}`.
//! Resolution is a pure, dependency-free string substitution pass — not a
//! general expression language. Unresolved placeholders are left verbatim so
//! a typo in a template degrades to visible text instead of aborting the
//! mission.

use std::collections::HashMap;

use serde_json::Value;

/// Render a value for interpolation into a template: strings pass through
/// unquoted, everything else falls back to its JSON text form.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve every `{{vars.NAME}}` / `{{inputs.NAME}}` / `{{item.FIELD}}`
/// placeholder in `template`, looking `vars`/`inputs` up in the supplied maps
/// and `item` fields up in `item` (when the task is being iterated).
///
/// # Example
///
/// ```rust
/// use missionrt::objective::resolve_objective;
/// use std::collections::HashMap;
/// use serde_json::json;
///
/// let mut vars = HashMap::new();
/// vars.insert("topic".to_string(), json!("rust"));
/// let resolved = resolve_objective(
///     "Write a summary about {{vars.topic}} for {{item.title}}",
///     &vars,
///     &HashMap::new(),
///     Some(&json!({"title": "async runtimes"})),
/// );
/// assert_eq!(resolved, "Write a summary about rust for async runtimes");
/// ```
pub fn resolve_objective(
    template: &str,
    vars: &HashMap<String, Value>,
    inputs: &HashMap<String, Value>,
    item: Option<&Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + 2..];
                match after_open.find("}}") {
                    None => {
                        // Unterminated placeholder: emit verbatim.
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let path = after_open[..end].trim();
                        let replacement = resolve_path(path, vars, inputs, item)
                            .unwrap_or_else(|| format!("{{{{{}}}}}", path));
                        out.push_str(&replacement);
                        rest = &after_open[end + 2..];
                    }
                }
            }
        }
    }

    out
}

fn resolve_path(
    path: &str,
    vars: &HashMap<String, Value>,
    inputs: &HashMap<String, Value>,
    item: Option<&Value>,
) -> Option<String> {
    let (namespace, field) = path.split_once('.')?;
    let value = match namespace {
        "vars" => vars.get(field),
        "inputs" => inputs.get(field),
        "item" => item.and_then(|v| v.get(field)),
        _ => None,
    }?;
    Some(render_value(value))
}
