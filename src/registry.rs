//! Name to constructor maps for the pluggable strategies (runners, verifiers, adapters).
//!
//! Registries are filled once at startup by explicit `register` calls and handed to the
//! [`Grader`](crate::grader::Grader). Lookups of unknown names fail with the list of valid ones.

use std::{collections::BTreeMap, fmt::Debug};

use anyhow::anyhow;

type Constructor<T> = Box<dyn Fn() -> Box<T> + Send + Sync>;

pub struct Registry<T: ?Sized> {
    kind: &'static str,
    constructors: BTreeMap<String, Constructor<T>>,
}

impl<T: ?Sized> Registry<T> {
    /// An empty registry. `kind` names the entries in error messages ("verifier", ...).
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            constructors: BTreeMap::new(),
        }
    }

    /// Registers `constructor` under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> Box<T> + Send + Sync + 'static,
    ) -> &mut Self {
        self.constructors.insert(name.into(), Box::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Fails when `name` is not registered.
    pub fn ensure(&self, name: &str) -> anyhow::Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(anyhow!(
                "Unknown {} '{name}', expected one of: {}",
                self.kind,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        }
    }

    /// A fresh instance of the entry named `name`.
    pub fn create(&self, name: &str) -> anyhow::Result<Box<T>> {
        self.ensure(name)?;
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| anyhow!("Unknown {} '{name}'", self.kind))
    }
}

impl<T: ?Sized> Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    trait Greeter {
        fn greet(&self) -> String;
    }

    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn unknown_names_list_the_valid_ones() {
        let mut registry: Registry<dyn Greeter> = Registry::new("greeter");
        registry
            .register("hello", || Box::new(Hello))
            .register("again", || Box::new(Hello));

        assert_eq!(registry.create("hello").unwrap().greet(), "hello");
        let error = registry.create("bonjour").err().unwrap().to_string();
        assert_eq!(
            error,
            "Unknown greeter 'bonjour', expected one of: again, hello"
        );
    }
}
