use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use shadow_protocol::Token;

use crate::config::RegistryConfig;
use crate::error::KernelError;
use crate::shadow::{ShadowCx, Teardown};

/// Builds the shadow object for one token. May hand back a teardown that
/// runs when the entity is destroyed.
pub type Factory = Rc<dyn Fn(&mut ShadowCx<'_>) -> anyhow::Result<Option<Teardown>>>;

/// Token → factory table plus the composition routes between tokens.
#[derive(Default, Clone)]
pub struct Registry {
    factories: HashMap<Token, Factory>,
    routes: IndexMap<Token, IndexSet<Token>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the factory for `token`.
    pub fn define<F>(&mut self, token: impl Into<Token>, factory: F)
    where
        F: Fn(&mut ShadowCx<'_>) -> anyhow::Result<Option<Teardown>> + 'static,
    {
        let token = token.into();
        if self.factories.insert(token.clone(), Rc::new(factory)).is_some() {
            log::debug!("factory for '{token}' replaced");
        }
    }

    pub fn define_factory(&mut self, token: impl Into<Token>, factory: Factory) {
        self.factories.insert(token.into(), factory);
    }

    /// Appends `additional` to the route of `token`, keeping first-seen order
    /// and merging duplicates across calls.
    pub fn append_route<I, T>(&mut self, token: impl Into<Token>, additional: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        let route = self.routes.entry(token.into()).or_default();
        route.extend(additional.into_iter().map(Into::into));
    }

    /// Resolves the composition closure of `token`.
    ///
    /// The result starts with `token`, holds every token reachable through
    /// the route graph exactly once, in breadth-first discovery order. Cycles
    /// are cut by the visited set. An unknown route resolves to `[token]`.
    pub fn find_tokens_by_route(&self, token: &str) -> Vec<Token> {
        let mut tokens: Vec<Token> = vec![token.to_string()];
        let mut visited: HashSet<&str> = HashSet::from([token]);
        let mut next = 0;
        while next < tokens.len() {
            let Some(route) = self.routes.get(tokens[next].as_str()) else {
                next += 1;
                continue;
            };
            for target in route {
                if visited.insert(target.as_str()) {
                    tokens.push(target.clone());
                }
            }
            next += 1;
        }
        tokens
    }

    pub fn factory(&self, token: &str) -> Option<Factory> {
        self.factories.get(token).cloned()
    }

    pub fn has_factory(&self, token: &str) -> bool {
        self.factories.contains_key(token)
    }

    pub fn route(&self, token: &str) -> Option<Vec<Token>> {
        self.routes
            .get(token)
            .map(|route| route.iter().cloned().collect())
    }

    /// Applies a declarative config. Factory names are resolved through
    /// `resolve`; routes are appended like [`Registry::append_route`].
    pub fn load_config<R>(&mut self, config: &RegistryConfig, resolve: R) -> Result<(), KernelError>
    where
        R: Fn(&str) -> Option<Factory>,
    {
        for (token, name) in &config.define {
            let factory = resolve(name).ok_or_else(|| KernelError::UnknownFactory {
                token: token.clone(),
                factory: name.clone(),
            })?;
            self.define_factory(token.clone(), factory);
        }
        for (token, targets) in &config.routes {
            self.append_route(token.clone(), targets.iter().cloned());
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.factories.clear();
        self.routes.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut factories: Vec<_> = self.factories.keys().collect();
        factories.sort();
        f.debug_struct("Registry")
            .field("factories", &factories)
            .field("routes", &self.routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_transitive_routes_once() {
        let mut registry = Registry::new();
        registry.append_route("foo", ["bar", "plah"]);
        registry.append_route("plah", ["foo", "xyz", "abc"]);

        assert_eq!(
            registry.find_tokens_by_route("foo"),
            vec!["foo", "bar", "plah", "xyz", "abc"]
        );
        assert_eq!(
            registry.find_tokens_by_route("plah"),
            vec!["plah", "foo", "xyz", "abc", "bar"]
        );
    }

    #[test]
    fn undefined_route_is_just_the_token() {
        let registry = Registry::new();
        assert_eq!(registry.find_tokens_by_route("lonely"), vec!["lonely"]);
    }

    #[test]
    fn append_route_merges_duplicates() {
        let mut registry = Registry::new();
        registry.append_route("a", ["b", "c"]);
        registry.append_route("a", ["c", "d", "b"]);
        assert_eq!(registry.route("a").unwrap(), vec!["b", "c", "d"]);
    }

    #[test]
    fn self_cycle_terminates() {
        let mut registry = Registry::new();
        registry.append_route("a", ["a", "b"]);
        registry.append_route("b", ["c"]);
        registry.append_route("c", ["a", "b"]);
        assert_eq!(registry.find_tokens_by_route("a"), vec!["a", "b", "c"]);
    }

    #[test]
    fn resolution_is_closed_over_reachable_tokens() {
        let mut registry = Registry::new();
        let edges = [
            ("t0", vec!["t3", "t1"]),
            ("t1", vec!["t2", "t0"]),
            ("t2", vec!["t4"]),
            ("t3", vec!["t1", "t5"]),
            ("t5", vec!["t5", "t0"]),
        ];
        for (token, targets) in &edges {
            registry.append_route(*token, targets.iter().copied());
        }

        for (start, _) in &edges {
            let resolved = registry.find_tokens_by_route(start);
            assert_eq!(resolved[0], *start);
            let unique: HashSet<_> = resolved.iter().collect();
            assert_eq!(unique.len(), resolved.len(), "duplicates for {start}");
            for token in &resolved {
                for target in registry.route(token).unwrap_or_default() {
                    assert!(resolved.contains(&target), "{target} missing for {start}");
                }
            }
        }
    }

    #[test]
    fn load_config_resolves_factory_names() {
        let config: RegistryConfig = serde_json::from_str(
            r#"{"define": {"glow": "effects/glow"}, "routes": {"scene": ["glow", "camera"]}}"#,
        )
        .unwrap();
        let mut registry = Registry::new();
        registry
            .load_config(&config, |name| {
                (name == "effects/glow").then(|| {
                    Rc::new(|_: &mut ShadowCx<'_>| -> anyhow::Result<Option<Teardown>> {
                        Ok(None)
                    }) as Factory
                })
            })
            .unwrap();
        assert!(registry.has_factory("glow"));
        assert_eq!(
            registry.find_tokens_by_route("scene"),
            vec!["scene", "glow", "camera"]
        );

        let bad: RegistryConfig =
            serde_json::from_str(r#"{"define": {"x": "nowhere"}}"#).unwrap();
        assert!(matches!(
            Registry::new().load_config(&bad, |_| None),
            Err(KernelError::UnknownFactory { .. })
        ));
    }
}
