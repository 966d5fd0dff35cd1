use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind, Write as _},
    path::{Path, PathBuf},
};

use super::{ModelStore, Result};
use crate::model::Model;

const TEMP_FILE_EXTENSION: &str = "tmp";

/// Stores the model as a single JSON file
///
/// The file is replaced atomically by writing into a temporary
/// sibling file that is renamed afterwards.
#[derive(Debug, Clone)]
pub struct JsonFileModelStore {
    file_path: PathBuf,
}

impl JsonFileModelStore {
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn temp_file_path(&self) -> PathBuf {
        self.file_path.with_extension(TEMP_FILE_EXTENSION)
    }
}

impl ModelStore for JsonFileModelStore {
    fn load(&self) -> Result<Option<Model>> {
        let file = match File::open(&self.file_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::info!("No saved model found at {}", self.file_path.display());
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let mut model: Model = serde_json::from_reader(BufReader::new(file))?;
        // Derived state is not persisted
        model.refresh_operating_state();
        Ok(Some(model))
    }

    fn save(&self, model: &Model) -> Result<()> {
        let temp_file_path = self.temp_file_path();
        let mut writer = BufWriter::new(File::create(&temp_file_path)?);
        serde_json::to_writer_pretty(&mut writer, model)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&temp_file_path, &self.file_path)?;
        log::debug!("Saved model into {}", self.file_path.display());
        Ok(())
    }
}
