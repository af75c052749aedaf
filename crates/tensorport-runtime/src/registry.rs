use std::collections::HashMap;

use tensorport_core::{InferenceParam, NativeBackend, Result, SessionError};

use crate::{Inference, InferenceSession};

type Creator = Box<dyn Fn(InferenceParam) -> Box<dyn Inference> + Send + Sync>;

/// Backend name to session constructor. Built explicitly by whoever owns the
/// process; there is no global instance.
#[derive(Default)]
pub struct InferenceRegistry {
    creators: HashMap<String, Creator>,
}

impl InferenceRegistry {
    pub fn new() -> Self {
        Self {
            creators: HashMap::new(),
        }
    }

    pub fn register<B, F>(&mut self, name: &str, make_backend: F)
    where
        B: NativeBackend,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.creators.insert(
            name.to_string(),
            Box::new(move |param| -> Box<dyn Inference> {
                Box::new(InferenceSession::new(make_backend(), param))
            }),
        );
    }

    /// An uninitialized session for `name`; call `init` on it to load the model.
    pub fn create(&self, name: &str, param: InferenceParam) -> Result<Box<dyn Inference>> {
        let creator = self.creators.get(name).ok_or_else(|| {
            SessionError::InvalidArgument(format!(
                "unknown backend `{name}` (registered: {})",
                self.names().join(", ")
            ))
        })?;
        Ok(creator(param))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.creators.keys().cloned().collect();
        names.sort();
        names
    }
}
