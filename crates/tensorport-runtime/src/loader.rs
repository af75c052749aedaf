use std::path::{Path, PathBuf};

use bytes::Bytes;
use tensorport_core::{
    InferenceParam, ModelSource, NativeBackend, NativeSource, Result, SessionError,
};
use tracing::{debug, error, info, warn};

/// How the model reached the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Model bytes were handed over from process memory.
    Buffer,
    /// The backend opened the file itself, along with any external weight shards.
    Path,
}

#[derive(Debug)]
pub enum LoadPlan {
    Buffer(Bytes),
    Path(PathBuf),
}

impl LoadPlan {
    pub fn strategy(&self) -> LoadStrategy {
        match self {
            LoadPlan::Buffer(_) => LoadStrategy::Buffer,
            LoadPlan::Path(_) => LoadStrategy::Path,
        }
    }

    pub fn source(&self) -> NativeSource<'_> {
        match self {
            LoadPlan::Buffer(bytes) => NativeSource::Buffer(bytes),
            LoadPlan::Path(path) => NativeSource::Path(path),
        }
    }
}

/// Decides between buffer and path loading.
///
/// A model with external weight shards is always loaded by path: reading
/// multi-gigabyte shards into memory can exhaust the process.
pub fn plan_load(param: &InferenceParam) -> Result<LoadPlan> {
    let path = match &param.source {
        ModelSource::Buffer(bytes) => {
            if bytes.is_empty() {
                return Err(SessionError::InvalidArgument(
                    "model buffer is empty".to_string(),
                ));
            }
            return Ok(LoadPlan::Buffer(bytes.clone()));
        }
        ModelSource::Path(path) => path,
    };

    if path.as_os_str().is_empty() {
        return Err(SessionError::InvalidArgument(
            "path-based load requested without a model path".to_string(),
        ));
    }
    if !path.is_file() {
        return Err(SessionError::InvalidArgument(format!(
            "model file {} does not exist",
            path.display()
        )));
    }

    if !param.external_data.is_empty() {
        for shard in &param.external_data {
            let resolved = shard_path(path, shard);
            if !resolved.exists() {
                warn!(shard = %resolved.display(), "external data file is missing");
            }
        }
        info!(
            model = %path.display(),
            shards = param.external_data.len(),
            "external data present, loading by path"
        );
        return Ok(LoadPlan::Path(path.clone()));
    }

    let bytes = std::fs::read(path).map_err(|e| {
        SessionError::InvalidArgument(format!("failed to read {}: {e}", path.display()))
    })?;
    debug!(model = %path.display(), bytes = bytes.len(), "model read into memory");
    Ok(LoadPlan::Buffer(Bytes::from(bytes)))
}

/// Shards are resolved relative to the model's directory, as the backend does.
fn shard_path(model: &Path, shard: &Path) -> PathBuf {
    if shard.is_absolute() {
        return shard.to_path_buf();
    }
    model
        .parent()
        .map_or_else(|| shard.to_path_buf(), |dir| dir.join(shard))
}

pub fn load_session<B: NativeBackend>(
    backend: &B,
    param: &InferenceParam,
) -> Result<(B::Session, LoadStrategy)> {
    let plan = plan_load(param)?;
    let strategy = plan.strategy();

    let session = backend
        .create_session(plan.source(), &param.device, &param.options)
        .map_err(|err| {
            error!(
                backend = backend.name(),
                error = %format!("{err:#}"),
                "session creation failed"
            );
            SessionError::load(&err)
        })?;

    info!(backend = backend.name(), ?strategy, device = %param.device, "session created");
    Ok((session, strategy))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tensorport_core::ErrorKind;

    use super::*;

    fn model_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(contents).expect("write model");
        file
    }

    #[test]
    fn path_without_shards_is_read_into_memory() {
        let file = model_file(b"model-bytes");
        let plan = plan_load(&InferenceParam::from_path(file.path())).expect("plan");
        match plan {
            LoadPlan::Buffer(bytes) => assert_eq!(&bytes[..], b"model-bytes"),
            LoadPlan::Path(_) => panic!("expected buffer loading"),
        }
    }

    #[test]
    fn shards_force_path_loading() {
        let file = model_file(b"graph");
        let param = InferenceParam::from_path(file.path()).with_external_data("weights.bin");
        let plan = plan_load(&param).expect("plan");
        assert_eq!(plan.strategy(), LoadStrategy::Path);
        assert!(matches!(plan.source(), NativeSource::Path(p) if p == file.path()));
    }

    #[test]
    fn missing_or_empty_sources_are_argument_errors() {
        let missing = plan_load(&InferenceParam::from_path("/definitely/not/here.onnx"));
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::InvalidArgument);

        let empty_path = plan_load(&InferenceParam::from_path(""));
        assert_eq!(empty_path.unwrap_err().kind(), ErrorKind::InvalidArgument);

        let empty_buffer = plan_load(&InferenceParam::from_buffer(Bytes::new()));
        assert_eq!(empty_buffer.unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn relative_shards_resolve_next_to_the_model() {
        let resolved = shard_path(Path::new("/models/llm/model.onnx"), Path::new("w.bin"));
        assert_eq!(resolved, PathBuf::from("/models/llm/w.bin"));
        let absolute = shard_path(Path::new("/models/m.onnx"), Path::new("/data/w.bin"));
        assert_eq!(absolute, PathBuf::from("/data/w.bin"));
    }
}
