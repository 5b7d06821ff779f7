//! Renderer creation by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{AoRenderer, DebugRenderer, PathTracer, Renderer, SciVisRenderer};
use crate::config::RendererSettings;
use crate::error::{RenderError, Result};

/// Builds a renderer from its settings.
pub type RendererFactory = fn(RendererSettings) -> Arc<dyn Renderer>;

/// Maps renderer names (and their aliases) to factories.
#[derive(Debug, Clone, Default)]
pub struct RendererRegistry {
    factories: BTreeMap<String, RendererFactory>,
}

impl RendererRegistry {
    /// Registry with an empty name table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in renderers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in ["scivis", "sv"] {
            registry.register(name, scivis);
        }
        for name in ["pathtracer", "pt"] {
            registry.register(name, pathtracer);
        }
        registry.register("ao", ao);
        for name in ["debug", "raycast"] {
            registry.register(name, debug);
        }
        registry
    }

    /// Add or replace a factory.
    pub fn register(&mut self, name: &str, factory: RendererFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str, settings: RendererSettings) -> Result<Arc<dyn Renderer>> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory(settings)),
            None => {
                log::warn!("Unknown renderer type '{name}'");
                Err(RenderError::InvalidArgument(format!("unknown renderer type '{name}'")))
            }
        }
    }
}

fn scivis(settings: RendererSettings) -> Arc<dyn Renderer> {
    Arc::new(SciVisRenderer::new(settings))
}

fn pathtracer(settings: RendererSettings) -> Arc<dyn Renderer> {
    Arc::new(PathTracer::new(settings))
}

fn ao(settings: RendererSettings) -> Arc<dyn Renderer> {
    Arc::new(AoRenderer::new(settings))
}

fn debug(settings: RendererSettings) -> Arc<dyn Renderer> {
    Arc::new(DebugRenderer::new(settings))
}
