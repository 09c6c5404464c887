//! Page-wide, load-once injection of the engine script.

use std::{collections::HashMap, sync::Arc};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use map_engine::{EngineScript, ScriptHost};
use shared::error::PickerError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

type PendingLoad = Shared<BoxFuture<'static, Result<(), PickerError>>>;

/// One per page; widget instances share it through an `Arc`.
pub struct ScriptLoader {
    host: Arc<dyn ScriptHost>,
    pending: Mutex<HashMap<Url, PendingLoad>>,
}

impl ScriptLoader {
    pub fn new(host: Arc<dyn ScriptHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves once `script.global` is present, injecting at most one tag per URL at a time.
    pub async fn ensure_engine_loaded(&self, script: &EngineScript) -> Result<(), PickerError> {
        if self.host.has_global(&script.global) {
            return Ok(());
        }

        let load = {
            let mut pending = self.pending.lock().await;
            // Re-check under the lock: a load may have completed while we waited.
            if self.host.has_global(&script.global) {
                return Ok(());
            }
            pending
                .entry(script.url.clone())
                .or_insert_with(|| self.start_load(script))
                .clone()
        };

        let result = load.clone().await;
        if let Err(err) = &result {
            let mut pending = self.pending.lock().await;
            if pending
                .get(&script.url)
                .is_some_and(|current| current.ptr_eq(&load))
            {
                pending.remove(&script.url);
                warn!(url = %script.url, error = %err, "engine script load failed; next mount will retry");
            }
        }
        result
    }

    fn start_load(&self, script: &EngineScript) -> PendingLoad {
        let host = Arc::clone(&self.host);
        let script = script.clone();
        info!(url = %script.url, "injecting engine script");
        async move {
            host.inject_script(&script.url)
                .await
                .map_err(|err| PickerError::EngineUnavailable(err.to_string()))?;

            if host.has_global(&script.global) {
                debug!(url = %script.url, global = %script.global, "engine script loaded");
                Ok(())
            } else {
                Err(PickerError::EngineUnavailable(format!(
                    "script {} loaded without defining `{}`",
                    script.url, script.global
                )))
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
#[path = "tests/script_loader_tests.rs"]
mod tests;
