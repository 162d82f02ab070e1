//! Instance lifecycle manager
//!
//! Owns the registry of live instances. All mutation goes through this type:
//! admission (load-on-demand with single-flight loading), budget-bounded LRU
//! eviction, readiness aggregation, status snapshots, and shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use modeld_core::{
    InstanceState, ModelEntry, ModeldError, Result, Settings, StatusResponse,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::{BackendFactory, BackendKind, factory_for};
use crate::catalog::ModelCatalog;
use crate::instance::Instance;

struct Registry {
    instances: HashMap<String, Arc<Instance>>,
    closed: bool,
}

/// What the admission pass decided while the registry lock was held.
enum Plan {
    Use(Arc<Instance>),
    Wait(Arc<Instance>),
    Load {
        inst: Arc<Instance>,
        victims: Vec<Arc<Instance>>,
    },
}

/// Owner of every live [`Instance`].
pub struct InstanceManager {
    catalog: Arc<ModelCatalog>,
    settings: Settings,
    factory: BackendFactory,
    registry: Mutex<Registry>,
    started_at: Instant,
    loads_total: AtomicU64,
    evictions_total: AtomicU64,
}

impl InstanceManager {
    /// Build a manager whose backend implementation follows the settings:
    /// the subprocess engine when `llama_bin` is configured, the stub
    /// otherwise.
    pub fn new(catalog: Arc<ModelCatalog>, settings: Settings) -> Self {
        let kind = BackendKind::from_settings(&settings);
        let factory = factory_for(kind, &settings);
        Self::with_factory(catalog, settings, factory)
    }

    /// Build a manager with an explicit backend factory (tests, embedding).
    pub fn with_factory(
        catalog: Arc<ModelCatalog>,
        settings: Settings,
        factory: BackendFactory,
    ) -> Self {
        if let Some(ref def) = settings.default_model {
            if !catalog.contains(def) {
                warn!(model = %def, "default model is not in the catalog");
            }
        }
        Self {
            catalog,
            settings,
            factory,
            registry: Mutex::new(Registry { instances: HashMap::new(), closed: false }),
            started_at: Instant::now(),
            loads_total: AtomicU64::new(0),
            evictions_total: AtomicU64::new(0),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Catalog contents for `GET /models`.
    pub fn models(&self) -> Vec<ModelEntry> {
        self.catalog.list().to_vec()
    }

    /// Resolve `model_id` (or the configured default) to a ready instance,
    /// loading it on demand.
    ///
    /// Concurrent callers for the same unresolved id trigger exactly one
    /// backend start and all observe its outcome. A failed load is removed
    /// from the registry so the id can be retried.
    pub async fn resolve_or_load(&self, model_id: Option<&str>) -> Result<Arc<Instance>> {
        let id = match model_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => self
                .settings
                .default_model
                .clone()
                .ok_or_else(|| ModeldError::not_found("(unspecified)"))?,
        };

        loop {
            let plan = {
                let mut reg = self.registry.lock().await;
                if reg.closed {
                    return Err(ModeldError::Closed);
                }
                match reg.instances.get(&id).cloned() {
                    Some(inst) => match inst.state() {
                        InstanceState::Ready => {
                            inst.touch();
                            Plan::Use(inst)
                        }
                        InstanceState::Loading => Plan::Wait(inst),
                        // A terminal entry lingering from a failed or stopped
                        // instance; clear it and re-run admission.
                        _ => {
                            reg.instances.remove(&id);
                            continue;
                        }
                    },
                    None => {
                        let entry = self
                            .catalog
                            .lookup(&id)
                            .ok_or_else(|| ModeldError::not_found(&id))?
                            .clone();
                        let victims = self.select_victims(&mut reg);
                        let backend = (self.factory)(&entry);
                        let inst = Arc::new(Instance::new(
                            &id,
                            backend,
                            self.settings.max_queue_depth,
                            self.settings.max_wait,
                        ));
                        reg.instances.insert(id.clone(), inst.clone());
                        Plan::Load { inst, victims }
                    }
                }
            };

            match plan {
                Plan::Use(inst) => return Ok(inst),
                Plan::Wait(inst) => {
                    inst.wait_until_loaded().await?;
                    inst.touch();
                    return Ok(inst);
                }
                Plan::Load { inst, victims } => {
                    // Stop victims before starting the new engine so the
                    // budget slot is actually free when the load begins.
                    for victim in victims {
                        info!(model = %victim.model_id(), "evicting idle instance");
                        victim.stop().await;
                        self.evictions_total.fetch_add(1, Ordering::Relaxed);
                    }
                    return self.finish_load(&id, inst).await;
                }
            }
        }
    }

    async fn finish_load(&self, id: &str, inst: Arc<Instance>) -> Result<Arc<Instance>> {
        let started = Instant::now();
        match inst.start_backend().await {
            Ok(()) => {
                inst.mark_ready();
                inst.touch();
                self.loads_total.fetch_add(1, Ordering::Relaxed);
                info!(
                    model = %id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "instance ready"
                );
                Ok(inst)
            }
            Err(e) => {
                warn!(model = %id, error = %e, "instance failed to load");
                inst.mark_failed(e.to_string());
                let mut reg = self.registry.lock().await;
                if let Some(current) = reg.instances.get(id) {
                    if Arc::ptr_eq(current, &inst) {
                        reg.instances.remove(id);
                    }
                }
                Err(ModeldError::load_failed(id, e.to_string()))
            }
        }
    }

    /// Pick LRU eviction victims until the budget admits one more instance.
    ///
    /// Victims are removed from the registry immediately (so their budget
    /// slot is released under the lock) and stopped by the caller outside
    /// it. When every candidate is busy the budget is exceeded on purpose —
    /// availability wins over the strict bound.
    fn select_victims(&self, reg: &mut Registry) -> Vec<Arc<Instance>> {
        let budget = self.settings.max_instances;
        if budget == 0 {
            return Vec::new();
        }
        let mut victims = Vec::new();
        loop {
            let occupied = reg
                .instances
                .values()
                .filter(|i| matches!(i.state(), InstanceState::Loading | InstanceState::Ready))
                .count();
            if occupied < budget {
                break;
            }
            let victim = reg
                .instances
                .values()
                .filter(|i| i.state() == InstanceState::Ready && !i.is_busy())
                .min_by_key(|i| i.last_used())
                .cloned();
            match victim {
                Some(v) => {
                    reg.instances.remove(v.model_id());
                    victims.push(v);
                }
                None => {
                    warn!(
                        budget = budget,
                        occupied = occupied,
                        "budget reached with no idle instance; loading anyway"
                    );
                    break;
                }
            }
        }
        victims
    }

    /// True iff at least one instance is ready to serve.
    pub async fn ready(&self) -> bool {
        let reg = self.registry.lock().await;
        reg.instances
            .values()
            .any(|i| i.state() == InstanceState::Ready)
    }

    /// Read-only projection of the registry for `GET /status`.
    pub async fn snapshot_status(&self) -> StatusResponse {
        let reg = self.registry.lock().await;
        let mut instances: Vec<_> = reg.instances.values().map(|i| i.status()).collect();
        instances.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        StatusResponse {
            instances,
            max_instances: self.settings.max_instances,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            loads_total: self.loads_total.load(Ordering::Relaxed),
            evictions_total: self.evictions_total.load(Ordering::Relaxed),
        }
    }

    /// Stop every instance and close the registry. Later `resolve_or_load`
    /// calls fail fast with `Closed`. Idempotent.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Instance>> = {
            let mut reg = self.registry.lock().await;
            if reg.closed {
                return;
            }
            reg.closed = true;
            reg.instances.drain().map(|(_, inst)| inst).collect()
        };
        for inst in &drained {
            inst.stop().await;
        }
        info!(stopped = drained.len(), "instance manager shut down");
    }
}
