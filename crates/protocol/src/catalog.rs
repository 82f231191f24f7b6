//! Built-in message catalog and typed constructors.
//!
//! One entry per (target, name, param-set) triple of the core protocol.
//! The `build` module offers typed constructors for requests so handles
//! never assemble parameter maps by hand.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::message::{Message, MsgKind, Target};
use crate::path::NodePath;
use crate::registry::{MessageSpec, Registry};
use crate::value::{Schema, Value};

/// Search strategies understood by the accessibility `search` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    /// Direct children only.
    Simple,
    /// Direct children, scanned last-to-first.
    Backwards,
    /// Full-depth search.
    Deep,
}

impl SearchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMethod::Simple => "simple",
            SearchMethod::Backwards => "backwards",
            SearchMethod::Deep => "deep",
        }
    }
}

fn params(entries: Vec<(&str, Schema)>) -> BTreeMap<String, Schema> {
    entries
        .into_iter()
        .map(|(name, schema)| (name.to_string(), schema))
        .collect()
}

/// Installs the built-in catalog into `registry`.
pub fn install(registry: &mut Registry) -> Result<()> {
    use MsgKind::{Request, Response};
    use Target::{Accessibility, System};

    let specs = vec![
        // a11y requests
        MessageSpec::new(
            Request,
            Accessibility,
            "get",
            params(vec![
                ("path", Schema::Path),
                ("depth", Schema::Int),
                ("include", Schema::list_of("attr", Schema::Text)),
            ]),
        ),
        MessageSpec::new(
            Request,
            Accessibility,
            "search",
            params(vec![
                ("path", Schema::Path),
                (
                    "method",
                    Schema::choice(["simple", "backwards", "deep"]),
                ),
                ("predicates", Schema::param_set()),
            ]),
        ),
        MessageSpec::new(
            Request,
            Accessibility,
            "put",
            params(vec![("path", Schema::Path), ("text", Schema::Text)]),
        ),
        MessageSpec::new(
            Request,
            Accessibility,
            "put",
            params(vec![("path", Schema::Path), ("value", Schema::Float)]),
        ),
        MessageSpec::new(
            Request,
            Accessibility,
            "exec",
            params(vec![("path", Schema::Path), ("action", Schema::Text)]),
        ),
        MessageSpec::new(
            Request,
            Accessibility,
            "exec",
            params(vec![
                ("path", Schema::Path),
                ("keycode", Schema::Int),
                ("modifiers", Schema::list_of("modifier", Schema::Int)),
            ]),
        ),
        MessageSpec::new(
            Request,
            Accessibility,
            "exec",
            params(vec![
                ("path", Schema::Path),
                ("button", Schema::Text),
                ("event", Schema::Text),
                ("coordinates", Schema::fixed_list_of("coord", Schema::Int, 2)),
            ]),
        ),
        // sys requests
        MessageSpec::new(Request, System, "get", params(vec![("path", Schema::Text)])),
        MessageSpec::new(
            Request,
            System,
            "put",
            params(vec![("path", Schema::Text), ("data", Schema::Text)]),
        ),
        MessageSpec::new(
            Request,
            System,
            "exec",
            params(vec![("command", Schema::Text), ("wait", Schema::Bool)]),
        ),
        MessageSpec::new(Request, System, "info", params(vec![])),
        // a11y responses
        MessageSpec::new(
            Response,
            Accessibility,
            "get",
            params(vec![
                ("status", Schema::Bool),
                ("accessible", Schema::Accessible),
            ]),
        ),
        MessageSpec::new(
            Response,
            Accessibility,
            "search",
            params(vec![
                ("status", Schema::Bool),
                ("accessible", Schema::Accessible),
            ]),
        ),
        MessageSpec::new(
            Response,
            Accessibility,
            "put",
            params(vec![("status", Schema::Bool)]),
        ),
        MessageSpec::new(
            Response,
            Accessibility,
            "exec",
            params(vec![("status", Schema::Bool)]),
        ),
        // sys responses
        MessageSpec::new(
            Response,
            System,
            "get",
            params(vec![("status", Schema::Bool), ("data", Schema::Text)]),
        ),
        MessageSpec::new(
            Response,
            System,
            "put",
            params(vec![("status", Schema::Bool)]),
        ),
        MessageSpec::new(
            Response,
            System,
            "exec",
            params(vec![
                ("status", Schema::Bool),
                ("stdout", Schema::Text),
                ("stderr", Schema::Text),
            ]),
        ),
        MessageSpec::new(
            Response,
            System,
            "info",
            params(vec![
                ("status", Schema::Bool),
                ("version", Schema::Text),
                ("locale", Schema::Text),
                ("extensions", Schema::list_of("extension", Schema::Text)),
            ]),
        ),
    ];

    for spec in specs {
        registry.register(spec)?;
    }
    Ok(())
}

/// Typed request constructors.
pub mod build {
    use super::*;

    pub fn get_accessible(id: i64, path: &NodePath, depth: i64, include: &[String]) -> Message {
        Message::request(Target::Accessibility, "get")
            .with_id(id)
            .with_param("path", Value::Path(path.clone()))
            .with_param("depth", Value::Int(depth))
            .with_param(
                "include",
                Value::List(include.iter().map(|a| Value::text(a.clone())).collect()),
            )
    }

    pub fn search_accessible(
        id: i64,
        path: &NodePath,
        method: SearchMethod,
        predicates: &BTreeMap<String, String>,
    ) -> Message {
        Message::request(Target::Accessibility, "search")
            .with_id(id)
            .with_param("path", Value::Path(path.clone()))
            .with_param("method", Value::text(method.as_str()))
            .with_param(
                "predicates",
                Value::Map(
                    predicates
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::text(v.clone())))
                        .collect(),
                ),
            )
    }

    pub fn set_text(id: i64, path: &NodePath, text: &str) -> Message {
        Message::request(Target::Accessibility, "put")
            .with_id(id)
            .with_param("path", Value::Path(path.clone()))
            .with_param("text", Value::text(text))
    }

    pub fn set_value(id: i64, path: &NodePath, value: f64) -> Message {
        Message::request(Target::Accessibility, "put")
            .with_id(id)
            .with_param("path", Value::Path(path.clone()))
            .with_param("value", Value::Float(value))
    }

    pub fn exec_action(id: i64, path: &NodePath, action: &str) -> Message {
        Message::request(Target::Accessibility, "exec")
            .with_id(id)
            .with_param("path", Value::Path(path.clone()))
            .with_param("action", Value::text(action))
    }

    pub fn keyboard(id: i64, path: &NodePath, keycode: i64, modifiers: &[i64]) -> Message {
        Message::request(Target::Accessibility, "exec")
            .with_id(id)
            .with_param("path", Value::Path(path.clone()))
            .with_param("keycode", Value::Int(keycode))
            .with_param(
                "modifiers",
                Value::List(modifiers.iter().map(|m| Value::Int(*m)).collect()),
            )
    }

    pub fn mouse(id: i64, path: &NodePath, button: &str, event: &str, x: i64, y: i64) -> Message {
        Message::request(Target::Accessibility, "exec")
            .with_id(id)
            .with_param("path", Value::Path(path.clone()))
            .with_param("button", Value::text(button))
            .with_param("event", Value::text(event))
            .with_param("coordinates", Value::List(vec![Value::Int(x), Value::Int(y)]))
    }

    pub fn get_file(id: i64, path: &str) -> Message {
        Message::request(Target::System, "get")
            .with_id(id)
            .with_param("path", Value::text(path))
    }

    pub fn put_file(id: i64, path: &str, data: &str) -> Message {
        Message::request(Target::System, "put")
            .with_id(id)
            .with_param("path", Value::text(path))
            .with_param("data", Value::text(data))
    }

    pub fn system_exec(id: i64, command: &str, wait: bool) -> Message {
        Message::request(Target::System, "exec")
            .with_id(id)
            .with_param("command", Value::text(command))
            .with_param("wait", Value::Bool(wait))
    }

    pub fn device_info(id: i64) -> Message {
        Message::request(Target::System, "info").with_id(id)
    }

    pub fn extension(id: i64, name: &str, params: BTreeMap<String, Value>) -> Message {
        let mut msg = Message::request(Target::Extension, name).with_id(id);
        msg.params = params;
        msg
    }

    /// Response skeleton answering `request` with the given status.
    pub fn response_for(request: &Message, status: bool) -> Message {
        Message::response(request.target, request.name.clone(), status).with_id(request.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_installs_cleanly() {
        let registry = Registry::with_catalog();
        assert!(
            registry
                .lookup(
                    MsgKind::Request,
                    Target::System,
                    "exec",
                    &["command".into(), "wait".into()],
                )
                .is_some()
        );
    }

    #[test]
    fn put_variants_are_distinct_entries() {
        let registry = Registry::with_catalog();
        let text = registry.lookup(
            MsgKind::Request,
            Target::Accessibility,
            "put",
            &["path".into(), "text".into()],
        );
        let value = registry.lookup(
            MsgKind::Request,
            Target::Accessibility,
            "put",
            &["path".into(), "value".into()],
        );
        assert!(text.is_some());
        assert!(value.is_some());
    }

    #[test]
    fn constructors_match_their_specs() {
        let registry = Registry::with_catalog();
        let msg = build::mouse(7, &NodePath::from_indices([0]), "left", "click", 10, 20);
        assert!(
            registry
                .lookup(msg.kind, msg.target, &msg.name, &msg.param_names())
                .is_some()
        );
    }
}
