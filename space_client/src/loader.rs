//! Asset loading.
//!
//! Entities never load anything themselves. They queue a [`LoadRequest`]
//! tagged with their load generation; the space runs the request on a task
//! and feeds the [`LoadCompletion`] back on the tick thread, where a stale
//! generation is discarded.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use space_shared::{net::EntityId, node::Node, schema::Schema};
use tracing::{debug, warn};

use crate::script::ScriptModule;

/// What a URL is expected to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Model,
    Script,
}

/// A resolved asset.
#[derive(Clone)]
pub enum Asset {
    Blueprint(Arc<Node>),
    Script(Arc<dyn ScriptModule>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("{url} is not a {expected:?}")]
    WrongKind { url: String, expected: AssetKind },
    #[error("i/o error reading {url}: {reason}")]
    Io { url: String, reason: String },
    #[error("no runtime available to load assets")]
    NoRuntime,
}

/// Asset source.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Whether `url` is already available locally.
    fn has(&self, url: &str) -> bool;

    async fn load(&self, url: &str, kind: AssetKind) -> Result<Asset, LoadError>;
}

/// One entity's model plus optional script, for one load generation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub entity: EntityId,
    pub generation: u64,
    pub model: String,
    pub script: Option<String>,
}

impl LoadRequest {
    pub fn for_schema(entity: EntityId, generation: u64, schema: &Schema) -> Self {
        Self {
            entity,
            generation,
            model: schema.model.clone(),
            script: schema.script.clone(),
        }
    }
}

/// Everything a successful load produced.
#[derive(Clone)]
pub struct LoadedAssets {
    pub blueprint: Arc<Node>,
    pub script: Option<Arc<dyn ScriptModule>>,
}

pub struct LoadCompletion {
    pub entity: EntityId,
    pub generation: u64,
    pub result: Result<LoadedAssets, LoadError>,
}

/// Resolves the model and script of a request concurrently.
pub async fn fetch(loader: &dyn Loader, req: &LoadRequest) -> Result<LoadedAssets, LoadError> {
    let model = async {
        match loader.load(&req.model, AssetKind::Model).await? {
            Asset::Blueprint(node) => Ok::<_, LoadError>(node),
            Asset::Script(_) => Err(LoadError::WrongKind {
                url: req.model.clone(),
                expected: AssetKind::Model,
            }),
        }
    };
    let script = async {
        let Some(url) = &req.script else {
            return Ok::<_, LoadError>(None);
        };
        match loader.load(url, AssetKind::Script).await? {
            Asset::Script(module) => Ok(Some(module)),
            Asset::Blueprint(_) => Err(LoadError::WrongKind {
                url: url.clone(),
                expected: AssetKind::Script,
            }),
        }
    };
    let (blueprint, script) = tokio::try_join!(model, script)?;
    Ok(LoadedAssets { blueprint, script })
}

/// In-memory loader. Assets can be added while loads are in flight.
#[derive(Default)]
pub struct MemoryLoader {
    models: RwLock<HashMap<String, Arc<Node>>>,
    scripts: RwLock<HashMap<String, Arc<dyn ScriptModule>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(self, url: impl Into<String>, node: Node) -> Self {
        self.insert_model(url, node);
        self
    }

    pub fn with_script(self, url: impl Into<String>, module: Arc<dyn ScriptModule>) -> Self {
        self.insert_script(url, module);
        self
    }

    pub fn insert_model(&self, url: impl Into<String>, node: Node) {
        if let Ok(mut models) = self.models.write() {
            models.insert(url.into(), Arc::new(node));
        }
    }

    pub fn insert_script(&self, url: impl Into<String>, module: Arc<dyn ScriptModule>) {
        if let Ok(mut scripts) = self.scripts.write() {
            scripts.insert(url.into(), module);
        }
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn has(&self, url: &str) -> bool {
        let in_models = self.models.read().map_or(false, |m| m.contains_key(url));
        in_models || self.scripts.read().map_or(false, |s| s.contains_key(url))
    }

    async fn load(&self, url: &str, kind: AssetKind) -> Result<Asset, LoadError> {
        let found = match kind {
            AssetKind::Model => self
                .models
                .read()
                .ok()
                .and_then(|m| m.get(url).cloned())
                .map(Asset::Blueprint),
            AssetKind::Script => self
                .scripts
                .read()
                .ok()
                .and_then(|s| s.get(url).cloned())
                .map(Asset::Script),
        };
        found.ok_or_else(|| LoadError::NotFound(url.to_string()))
    }
}

/// Reads JSON blueprints from a directory; scripts come from a registry of
/// modules compiled into the client.
pub struct DirLoader {
    root: PathBuf,
    scripts: HashMap<String, Arc<dyn ScriptModule>>,
    cache: RwLock<HashMap<String, Arc<Node>>>,
}

impl DirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scripts: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_script(&mut self, url: impl Into<String>, module: Arc<dyn ScriptModule>) {
        self.scripts.insert(url.into(), module);
    }

    // Schemas come from peers, so model urls stay inside the root.
    fn resolve(&self, url: &str) -> Result<PathBuf, LoadError> {
        let relative = Path::new(url);
        let contained = relative.components().next().is_some()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !contained {
            warn!(%url, "model url escapes the assets dir");
            return Err(LoadError::NotFound(url.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn cached(&self, url: &str) -> Option<Arc<Node>> {
        self.cache.read().ok().and_then(|c| c.get(url).cloned())
    }
}

#[async_trait]
impl Loader for DirLoader {
    fn has(&self, url: &str) -> bool {
        self.scripts.contains_key(url) || self.cached(url).is_some()
    }

    async fn load(&self, url: &str, kind: AssetKind) -> Result<Asset, LoadError> {
        match kind {
            AssetKind::Script => self
                .scripts
                .get(url)
                .cloned()
                .map(Asset::Script)
                .ok_or_else(|| LoadError::NotFound(url.to_string())),
            AssetKind::Model => {
                if let Some(node) = self.cached(url) {
                    return Ok(Asset::Blueprint(node));
                }
                let path = self.resolve(url)?;
                debug!(path = %path.display(), "reading blueprint");
                let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        LoadError::NotFound(url.to_string())
                    } else {
                        LoadError::Io {
                            url: url.to_string(),
                            reason: e.to_string(),
                        }
                    }
                })?;
                let node: Node = serde_json::from_str(&raw).map_err(|e| LoadError::Decode {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
                let node = Arc::new(node);
                if let Ok(mut cache) = self.cache.write() {
                    cache.insert(url.to_string(), node.clone());
                }
                Ok(Asset::Blueprint(node))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use space_shared::math::Vec3;

    use super::*;
    use crate::script::{ScriptContext, ScriptError, ScriptHooks};

    struct Nop;
    struct NopHooks;

    impl ScriptHooks for NopHooks {}

    impl ScriptModule for Nop {
        fn instantiate(
            &self,
            _ctx: &mut ScriptContext<'_>,
        ) -> Result<Box<dyn ScriptHooks>, ScriptError> {
            Ok(Box::new(NopHooks))
        }
    }

    fn request(model: &str, script: Option<&str>) -> LoadRequest {
        LoadRequest {
            entity: EntityId::new("1.1"),
            generation: 1,
            model: model.into(),
            script: script.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn fetch_resolves_model_and_script() {
        let loader = MemoryLoader::new()
            .with_model("crate.glb", Node::cube("crate", "brown", Vec3::ZERO))
            .with_script("crate.js", Arc::new(Nop));
        let assets = fetch(&loader, &request("crate.glb", Some("crate.js")))
            .await
            .unwrap();
        assert_eq!(assets.blueprint.name, "crate");
        assert!(assets.script.is_some());
        assert!(loader.has("crate.glb"));
    }

    #[tokio::test]
    async fn fetch_fails_when_any_part_is_missing() {
        let loader = MemoryLoader::new().with_model("crate.glb", Node::group("$root"));
        let err = fetch(&loader, &request("crate.glb", Some("missing.js")))
            .await
            .err()
            .unwrap();
        assert_eq!(err, LoadError::NotFound("missing.js".into()));
    }

    #[tokio::test]
    async fn dir_loader_reads_and_caches_blueprints() {
        let dir = std::env::temp_dir().join(format!("space-loader-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("lamp.json"), r#"{"name": "$root", "type": "group"}"#)
            .await
            .unwrap();

        let loader = DirLoader::new(&dir);
        assert!(!loader.has("lamp.json"));
        let Asset::Blueprint(node) = loader.load("lamp.json", AssetKind::Model).await.unwrap()
        else {
            panic!("expected a blueprint");
        };
        assert_eq!(node.name, "$root");
        assert!(loader.has("lamp.json"));

        let missing = loader.load("nope.json", AssetKind::Model).await.err().unwrap();
        assert_eq!(missing, LoadError::NotFound("nope.json".into()));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn dir_loader_stays_inside_its_root() {
        let base = std::env::temp_dir().join(format!("space-loader-root-{}", std::process::id()));
        let root = base.join("assets");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(base.join("secret.json"), r#"{"name": "$root", "type": "group"}"#)
            .await
            .unwrap();

        let loader = DirLoader::new(&root);
        let outside = base.join("secret.json");
        for url in ["../secret.json", "./../secret.json", "", outside.to_str().unwrap()] {
            let err = loader.load(url, AssetKind::Model).await.err().unwrap();
            assert_eq!(err, LoadError::NotFound(url.to_string()));
        }
        let _ = tokio::fs::remove_dir_all(&base).await;
    }
}
