use ollamacode_core::{ConfigError, ModelSpec, RouterConfig, TaskClass};
use ollamacode_llm::{BackendError, ChatOptions, LlmClient, OllamaClient};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no model configured for task class '{0}'")]
    Unresolved(TaskClass),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Builds a client for a model name. Called at most once per name.
pub type ClientFactory = Arc<dyn Fn(&str) -> Arc<dyn LlmClient> + Send + Sync>;

/// Picks a model per task class and hands out one shared client per model name.
pub struct ModelRouter {
    config: RwLock<RouterConfig>,
    clients: RwLock<HashMap<String, Arc<dyn LlmClient>>>,
    factory: ClientFactory,
}

impl ModelRouter {
    pub fn new(config: RouterConfig, factory: ClientFactory) -> Result<Self, RouterError> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            clients: RwLock::new(HashMap::new()),
            factory,
        })
    }

    /// Router over Ollama clients that share one HTTP connection pool.
    pub fn for_ollama(base_url: &str, config: RouterConfig) -> Result<Self, RouterError> {
        let http = ollamacode_llm::http_client()?;
        let base_url = base_url.to_string();
        let factory: ClientFactory = Arc::new(move |model: &str| {
            Arc::new(OllamaClient::with_http(&base_url, model, http.clone())) as Arc<dyn LlmClient>
        });
        Self::new(config, factory)
    }

    pub fn config(&self) -> RouterConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and swap the configuration. Cached clients are kept; they are
    /// keyed by model name, not by class.
    pub fn set_config(&self, config: RouterConfig) -> Result<(), RouterError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn spec_for(&self, class: TaskClass) -> Result<ModelSpec, RouterError> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .spec_for(class)
            .cloned()
            .ok_or(RouterError::Unresolved(class))
    }

    /// Sampling options matching the class's model spec.
    pub fn options_for(&self, class: TaskClass) -> Result<ChatOptions, RouterError> {
        Ok(ChatOptions::from_spec(&self.spec_for(class)?))
    }

    pub fn get_client(&self, class: TaskClass) -> Result<Arc<dyn LlmClient>, RouterError> {
        let spec = self.spec_for(class)?;
        Ok(self.get_client_for_model(&spec.name))
    }

    pub fn get_client_for_model(&self, name: &str) -> Arc<dyn LlmClient> {
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(client);
        }
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have built it between the two locks.
        if let Some(client) = clients.get(name) {
            return Arc::clone(client);
        }
        let client = (self.factory)(name);
        clients.insert(name.to_string(), Arc::clone(&client));
        client
    }

    /// Model names with a live client, sorted.
    pub fn cached_models(&self) -> Vec<String> {
        let mut names = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
