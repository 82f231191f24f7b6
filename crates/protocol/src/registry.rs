//! Message registry: (kind, target, name, sorted-param-names) -> schema.
//!
//! The registry is the statically-typed rendition of the source system's
//! runtime class registry: every known message shape is described by a
//! [`MessageSpec`], and extensions register request/response spec pairs
//! explicitly at startup. Two registrations on the same key are a
//! programming error and fail fast.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::catalog;
use crate::error::{ProtocolError, Result};
use crate::message::{MsgKind, Target};
use crate::value::Schema;

/// Declared shape of one message: its key fields plus per-parameter schemas.
#[derive(Debug, Clone)]
pub struct MessageSpec {
    pub kind: MsgKind,
    pub target: Target,
    pub name: String,
    pub params: BTreeMap<String, Schema>,
}

impl MessageSpec {
    pub fn new(
        kind: MsgKind,
        target: Target,
        name: impl Into<String>,
        params: BTreeMap<String, Schema>,
    ) -> Self {
        Self {
            kind,
            target,
            name: name.into(),
            params,
        }
    }

    fn key(&self) -> MessageKey {
        MessageKey {
            kind: self.kind,
            target: self.target,
            name: self.name.clone(),
            params: self.params.keys().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MessageKey {
    kind: MsgKind,
    target: Target,
    name: String,
    /// Sorted parameter names.
    params: Vec<String>,
}

/// Registry of known message shapes.
#[derive(Debug, Default)]
pub struct Registry {
    exact: HashMap<MessageKey, Arc<MessageSpec>>,
    /// Secondary index for loose lookups, keyed without the param set.
    by_name: HashMap<(MsgKind, Target, String), Vec<Arc<MessageSpec>>>,
    extensions: Vec<String>,
}

impl Registry {
    /// An empty registry; mainly useful for tests.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in message catalog.
    pub fn with_catalog() -> Self {
        let mut registry = Self::default();
        catalog::install(&mut registry).expect("built-in catalog keys are distinct");
        registry
    }

    /// Registers one message spec; duplicate keys fail fast.
    pub fn register(&mut self, spec: MessageSpec) -> Result<()> {
        let key = spec.key();
        if self.exact.contains_key(&key) {
            return Err(ProtocolError::DuplicateRegistration {
                kind: key.kind,
                target: key.target,
                name: key.name,
                params: key.params,
            });
        }
        let spec = Arc::new(spec);
        self.by_name
            .entry((spec.kind, spec.target, spec.name.clone()))
            .or_default()
            .push(Arc::clone(&spec));
        self.exact.insert(key, spec);
        Ok(())
    }

    /// Registers a protocol extension under `target=ext`: a request spec
    /// with the declared parameters and a response spec that additionally
    /// carries `status`.
    pub fn register_extension(
        &mut self,
        name: &str,
        request_params: BTreeMap<String, Schema>,
        mut response_params: BTreeMap<String, Schema>,
    ) -> Result<()> {
        response_params.insert("status".into(), Schema::Bool);
        self.register(MessageSpec::new(
            MsgKind::Request,
            Target::Extension,
            name,
            request_params,
        ))?;
        self.register(MessageSpec::new(
            MsgKind::Response,
            Target::Extension,
            name,
            response_params,
        ))?;
        self.extensions.push(name.to_string());
        Ok(())
    }

    /// Names of registered extensions, in registration order.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Exact lookup by (kind, target, name, sorted param names).
    pub fn lookup(
        &self,
        kind: MsgKind,
        target: Target,
        name: &str,
        params: &[String],
    ) -> Option<&Arc<MessageSpec>> {
        let key = MessageKey {
            kind,
            target,
            name: name.to_string(),
            params: params.to_vec(),
        };
        self.exact.get(&key)
    }

    /// Loose lookup: a spec with the same (kind, target, name) whose
    /// parameters are a superset of the message's. This is how responses
    /// that legitimately omit result parameters (e.g. a failed `get` with
    /// only `status`) still bind to their spec. Among candidates the one
    /// with the fewest extra parameters wins.
    pub fn lookup_loose(
        &self,
        kind: MsgKind,
        target: Target,
        name: &str,
        params: &[String],
    ) -> Option<&Arc<MessageSpec>> {
        let candidates = self
            .by_name
            .get(&(kind, target, name.to_string()))?;
        candidates
            .iter()
            .filter(|spec| params.iter().all(|p| spec.params.contains_key(p)))
            .min_by_key(|spec| spec.params.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Schema;

    fn spec(name: &str, params: &[(&str, Schema)]) -> MessageSpec {
        MessageSpec::new(
            MsgKind::Request,
            Target::Extension,
            name,
            params
                .iter()
                .map(|(n, s)| (n.to_string(), s.clone()))
                .collect(),
        )
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let mut registry = Registry::empty();
        registry.register(spec("probe", &[("arg", Schema::Text)])).unwrap();
        let err = registry
            .register(spec("probe", &[("arg", Schema::Int)]))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateRegistration { .. }));
    }

    #[test]
    fn same_name_different_param_sets_coexist() {
        let mut registry = Registry::empty();
        registry.register(spec("probe", &[("arg", Schema::Text)])).unwrap();
        registry
            .register(spec("probe", &[("other", Schema::Text)]))
            .unwrap();
        assert!(
            registry
                .lookup(MsgKind::Request, Target::Extension, "probe", &["arg".into()])
                .is_some()
        );
        assert!(
            registry
                .lookup(MsgKind::Request, Target::Extension, "probe", &["other".into()])
                .is_some()
        );
    }

    #[test]
    fn loose_lookup_accepts_param_subset() {
        let registry = Registry::with_catalog();
        // A failed a11y get answers with `status` alone.
        let spec = registry
            .lookup_loose(
                MsgKind::Response,
                Target::Accessibility,
                "get",
                &["status".into()],
            )
            .unwrap();
        assert!(spec.params.contains_key("accessible"));
    }

    #[test]
    fn extension_registration_creates_request_and_response() {
        let mut registry = Registry::empty();
        let mut params = BTreeMap::new();
        params.insert("level".to_string(), Schema::Int);
        registry
            .register_extension("battery", params, BTreeMap::new())
            .unwrap();
        assert!(
            registry
                .lookup(MsgKind::Request, Target::Extension, "battery", &["level".into()])
                .is_some()
        );
        assert!(
            registry
                .lookup(MsgKind::Response, Target::Extension, "battery", &["status".into()])
                .is_some()
        );
        assert_eq!(registry.extensions(), ["battery"]);
    }
}
