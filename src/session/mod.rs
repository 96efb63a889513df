//! Model session lifecycle
//!
//! Owns which model is active, routes prompts through the engine runner,
//! and unloads the active model after a configurable idle period.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::catalog::{self, ModelDescriptor};
use crate::engine::locate;
use crate::engine::runner::{self, GenerationConfig};
use crate::prompt::{ContextSnapshot, PassthroughPromptBuilder, PromptBuilder};
use crate::storage;
use crate::storage::settings::AppSettings;

/// Engine context window. Owned by this crate, not user-configurable.
pub const CONTEXT_SIZE: u32 = 2048;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Mutable session bookkeeping, serialized behind one mutex.
///
/// The epoch counter stamps every activation change; an idle timer captures
/// the epoch at scheduling time and no-ops if it fires stale.
struct SessionState {
    active_model: Option<String>,
    loading: bool,
    epoch: u64,
    idle_task: Option<tokio::task::JoinHandle<()>>,
}

/// Coordinates model activation, generation and idle eviction.
#[derive(Clone)]
pub struct SessionManager {
    state: Arc<Mutex<SessionState>>,
    settings: Arc<RwLock<AppSettings>>,
    prompt_builder: Arc<dyn PromptBuilder>,
    models: Arc<Vec<ModelDescriptor>>,
    models_dir: PathBuf,
    env: EnvLookup,
}

impl SessionManager {
    pub fn new(settings: Arc<RwLock<AppSettings>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                active_model: None,
                loading: false,
                epoch: 0,
                idle_task: None,
            })),
            settings,
            prompt_builder: Arc::new(PassthroughPromptBuilder),
            models: Arc::new(catalog::available().to_vec()),
            models_dir: storage::models_dir(),
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    /// Substitute the catalog, models directory and environment lookup.
    /// Used by tests and embedders with a non-default layout.
    pub fn with_overrides(
        mut self,
        models: Vec<ModelDescriptor>,
        models_dir: PathBuf,
        env: EnvLookup,
    ) -> Self {
        self.models = Arc::new(models);
        self.models_dir = models_dir;
        self.env = env;
        self
    }

    /// Currently active model id, if any.
    pub fn active_model(&self) -> Option<String> {
        self.lock_state().active_model.clone()
    }

    /// Whether an activation is in flight.
    pub fn is_loading(&self) -> bool {
        self.lock_state().loading
    }

    /// Catalog entries without a valid local file.
    pub fn missing_models(&self) -> Vec<ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| !m.is_valid_in(&self.models_dir))
            .cloned()
            .collect()
    }

    /// Record `id` as the default model. Switching away from the active
    /// model forces an unload; the next `generate` pays the reload.
    pub fn select_model(&self, id: &str) {
        let switching = self.lock_state().active_model.as_deref() != Some(id);
        if switching {
            self.unload_active();
        }
        self.write_settings().default_model_id = id.to_string();
    }

    /// Unload the active model and cancel any pending idle timer.
    /// Idempotent; safe to call at shutdown.
    pub fn unload_active(&self) {
        let mut state = self.lock_state();
        if let Some(task) = state.idle_task.take() {
            task.abort();
        }
        state.epoch += 1;
        if state.active_model.take().is_some() {
            tracing::info!("Model unloaded");
        }
    }

    /// Run one generation, streaming chunks back to the caller.
    ///
    /// Failures surface as in-band diagnostic chunks, never as errors:
    /// the consuming surface renders every outcome the same way.
    pub fn generate(&self, prompt: &str, context: &ContextSnapshot) -> ReceiverStream<String> {
        let (tx, rx) = mpsc::channel::<String>(32);
        let manager = self.clone();
        let prompt = prompt.to_string();
        let context = context.clone();
        tokio::spawn(async move {
            manager.run_generation(prompt, context, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn run_generation(&self, prompt: String, context: ContextSnapshot, tx: mpsc::Sender<String>) {
        let (model_id, streaming, max_tokens, temperature, top_p, gpu_layers, binary_override, idle) = {
            let s = self.read_settings();
            (
                s.default_model_id.clone(),
                s.streaming_enabled,
                s.max_tokens,
                s.temperature,
                s.top_p,
                s.gpu_layers,
                s.engine_binary_path.clone(),
                Duration::from_secs_f64(s.idle_timeout_secs),
            )
        };

        let Some(model) = self.models.iter().find(|m| m.id == model_id).cloned() else {
            let _ = tx.send("Unknown model selected.".to_string()).await;
            return;
        };
        if !model.is_valid_in(&self.models_dir) {
            let _ = tx
                .send("Model missing. Download it before generating.".to_string())
                .await;
            return;
        }

        self.activate(&model.id);

        let override_path = (!binary_override.is_empty()).then_some(binary_override.as_str());
        let Some(binary) = locate::resolve_binary_with(override_path, &|key| (self.env)(key)) else {
            let _ = tx
                .send(format!("Inference engine not found. {}", locate::install_hint()))
                .await;
            return;
        };

        let built = self.prompt_builder.build_prompt(&prompt, &context);
        let config = GenerationConfig {
            binary,
            model_path: model.local_path_in(&self.models_dir),
            max_tokens,
            temperature,
            top_p,
            context_size: CONTEXT_SIZE,
            gpu_layers,
        };

        let mut stream = runner::stream_generate(&built, &config);
        if streaming {
            loop {
                tokio::select! {
                    // Caller abandoned us; returning drops the runner
                    // stream, which takes the subprocess down with it.
                    _ = tx.closed() => return,
                    chunk = stream.next() => match chunk {
                        Some(chunk) => {
                            if tx.send(chunk).await.is_err() {
                                return;
                            }
                        }
                        None => break,
                    }
                }
            }
        } else {
            let mut full = String::new();
            loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    chunk = stream.next() => match chunk {
                        Some(chunk) => full.push_str(&chunk),
                        None => break,
                    }
                }
            }
            if tx.send(full.trim().to_string()).await.is_err() {
                return;
            }
        }

        self.schedule_idle_unload(idle);
    }

    /// Mark `id` active, cancelling any pending idle timer. The loading
    /// flag only spans this critical section: no weights are loaded in
    /// this process, the spawned engine does that work.
    fn activate(&self, id: &str) {
        let mut state = self.lock_state();
        if let Some(task) = state.idle_task.take() {
            task.abort();
        }
        state.epoch += 1;
        if state.active_model.as_deref() != Some(id) {
            state.loading = true;
            state.active_model = Some(id.to_string());
            state.loading = false;
            tracing::info!("Activated model {}", id);
        }
    }

    /// Single-shot, replace-on-completion timer. A superseded timer sees a
    /// newer epoch when it fires and leaves the session alone.
    fn schedule_idle_unload(&self, idle: Duration) {
        let mut state = self.lock_state();
        if let Some(task) = state.idle_task.take() {
            task.abort();
        }
        state.epoch += 1;
        let scheduled_epoch = state.epoch;
        let shared = Arc::clone(&self.state);
        state.idle_task = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
            if state.epoch == scheduled_epoch {
                state.idle_task = None;
                if state.active_model.take().is_some() {
                    tracing::info!("Idle timeout reached, model unloaded");
                }
            }
        }));
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_settings(&self) -> std::sync::RwLockReadGuard<'_, AppSettings> {
        self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_settings(&self) -> std::sync::RwLockWriteGuard<'_, AppSettings> {
        self.settings.write().unwrap_or_else(|e| e.into_inner())
    }
}
