use super::{ShaderStage, ShaderStageKind};
use crate::{Backend, Error, Result};
use ash::vk;
use std::{ffi::CString, fmt, fs, path::Path, sync::Arc};

/// A pre-compiled SPIR-V blob loaded into the backend.
pub struct ShaderModule {
    backend: Arc<dyn Backend>,
    name: String,
    raw: vk::ShaderModule,
}

impl ShaderModule {
    pub fn from_bytes(
        backend: &Arc<dyn Backend>,
        name: impl Into<String>,
        code: &[u8],
    ) -> Result<Arc<ShaderModule>> {
        let name = name.into();
        let raw = backend.create_shader_module(&name, code)?;
        log::debug!("Loaded shader {} ({} bytes)", name, code.len());

        Ok(Arc::new(ShaderModule {
            backend: backend.clone(),
            name,
            raw,
        }))
    }

    /// Loads the named resource `<directory>/<name>.bin`.
    pub fn load(
        backend: &Arc<dyn Backend>,
        directory: &Path,
        name: &str,
    ) -> Result<Arc<ShaderModule>> {
        let path = directory.join(format!("{}.bin", name));
        let code = fs::read(&path).map_err(|source| Error::ShaderResource { path, source })?;

        ShaderModule::from_bytes(backend, name, &code)
    }

    /// A stage running this module's `main`.
    pub fn stage(self: &Arc<Self>, kind: ShaderStageKind) -> ShaderStage {
        ShaderStage::new(kind, self.clone())
    }

    pub fn stage_with_entry_point(
        self: &Arc<Self>,
        kind: ShaderStageKind,
        entry_point: &str,
    ) -> Result<ShaderStage> {
        let entry_point = CString::new(entry_point).map_err(|_| {
            Error::precondition(format!("entry point {:?} contains a nul byte", entry_point))
        })?;
        Ok(ShaderStage::with_entry_point(kind, self.clone(), entry_point))
    }

    pub fn raw(&self) -> vk::ShaderModule {
        self.raw
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.backend.destroy_shader_module(self.raw);
    }
}

impl fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaderModule({}|{:?})", self.name, self.raw)
    }
}
