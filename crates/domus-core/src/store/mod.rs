//! Durable storage of the model

use std::io::Error as IoError;

use thiserror::Error;

use crate::{model::Model, sync::Mutex};

#[cfg(feature = "json-store")]
mod json;
#[cfg(feature = "json-store")]
pub use self::json::JsonFileModelStore;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] IoError),

    #[cfg(feature = "json-store")]
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait ModelStore {
    /// Load the most recently saved model
    ///
    /// Returns `None` if nothing has been saved yet.
    fn load(&self) -> Result<Option<Model>>;

    /// Replace the saved model
    fn save(&self, model: &Model) -> Result<()>;
}

pub type ModelStoreBoxed = Box<dyn ModelStore + Send + Sync + 'static>;

impl ModelStore for ModelStoreBoxed {
    fn load(&self) -> Result<Option<Model>> {
        (**self).load()
    }

    fn save(&self, model: &Model) -> Result<()> {
        (**self).save(model)
    }
}

#[derive(Debug, Default)]
struct MemoryModelStoreState {
    model: Option<Model>,
    save_count: usize,
}

/// Volatile storage
///
/// Keeps the most recently saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    state: Mutex<MemoryModelStoreState>,
}

impl MemoryModelStore {
    #[must_use]
    pub fn new(initial_model: Option<Model>) -> Self {
        Self {
            state: Mutex::new(MemoryModelStoreState {
                model: initial_model,
                save_count: 0,
            }),
        }
    }

    /// Number of invocations of [`ModelStore::save()`]
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.state.lock().save_count
    }

    #[must_use]
    pub fn saved_model(&self) -> Option<Model> {
        self.state.lock().model.clone()
    }
}

impl ModelStore for MemoryModelStore {
    fn load(&self) -> Result<Option<Model>> {
        Ok(self.saved_model())
    }

    fn save(&self, model: &Model) -> Result<()> {
        let mut state = self.state.lock();
        state.model = Some(model.clone());
        state.save_count += 1;
        Ok(())
    }
}
