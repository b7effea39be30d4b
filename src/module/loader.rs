use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use super::{
    Module, ModuleApiVersionFn, ModuleDeclareFn, API_VERSION_SYMBOL, DECLARE_SYMBOL, MODULE_API_VERSION,
};
use crate::compiler::CompiledModule;
use crate::error::{io_error, load_error, symbol_error, HotloadError, HotloadResult};

/// Turns a compiled image into a bound module
pub trait ModuleLoad {
    fn load(&mut self, compiled: &CompiledModule) -> HotloadResult<Module>;
}

/// Loads module images as shared libraries.
///
/// Every image is written to its own numbered file in the shadow
/// directory before opening, so the build output can be overwritten
/// while earlier generations stay mapped until they are unloaded.
pub struct DylibLoader {
    shadow_dir: PathBuf,
    counter: u64,
}

impl DylibLoader {
    pub fn new(shadow_dir: impl Into<PathBuf>) -> HotloadResult<Self> {
        let shadow_dir = shadow_dir.into();
        std::fs::create_dir_all(&shadow_dir).map_err(|e| io_error(&shadow_dir, e))?;

        Ok(Self {
            shadow_dir,
            counter: 0,
        })
    }

    /// Loader shadowing into the system temp directory
    pub fn in_temp_dir() -> HotloadResult<Self> {
        Self::new(std::env::temp_dir().join("hotload_modules"))
    }

    pub fn shadow_dir(&self) -> &Path {
        &self.shadow_dir
    }

    fn shadow_path(&mut self, name: &str) -> PathBuf {
        self.counter += 1;
        self.shadow_dir.join(format!(
            "{}{}_{}{}",
            std::env::consts::DLL_PREFIX,
            name,
            self.counter,
            std::env::consts::DLL_SUFFIX
        ))
    }
}

impl ModuleLoad for DylibLoader {
    fn load(&mut self, compiled: &CompiledModule) -> HotloadResult<Module> {
        let path = self.shadow_path(&compiled.name);
        std::fs::write(&path, &compiled.image).map_err(|e| io_error(&path, e))?;

        if let Some(symbols) = &compiled.symbols {
            let symbols_path = path.with_extension("pdb");
            std::fs::write(&symbols_path, symbols).map_err(|e| io_error(&symbols_path, e))?;
        }

        let library = unsafe { Library::new(&path) }.map_err(|e| load_error(&path, e))?;

        let version = unsafe {
            let api_version: Symbol<ModuleApiVersionFn> = library
                .get(API_VERSION_SYMBOL)
                .map_err(|e| symbol_error("hotload_module_api_version", e))?;
            api_version()
        };

        if version != MODULE_API_VERSION {
            return Err(HotloadError::ApiVersionMismatch {
                expected: MODULE_API_VERSION,
                found: version,
            });
        }

        let decl = unsafe {
            let declare: Symbol<ModuleDeclareFn> = library
                .get(DECLARE_SYMBOL)
                .map_err(|e| symbol_error("hotload_module_declare", e))?;

            let raw = declare();
            if raw.is_null() {
                return Err(HotloadError::NullDeclaration);
            }
            *Box::from_raw(raw)
        };

        log::info!("Loaded module image {} ({} bytes)", path.display(), compiled.image.len());
        Module::from_decl(decl, Some(library))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shadow_paths_are_unique() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory for loader test");
        let mut loader = DylibLoader::new(temp_dir.path()).unwrap();

        let first = loader.shadow_path("game");
        let second = loader.shadow_path("game");

        assert_ne!(first, second);
        assert!(first.starts_with(temp_dir.path()));
    }

    #[test]
    fn test_garbage_image_fails_to_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory for loader test");
        let mut loader = DylibLoader::new(temp_dir.path()).unwrap();

        let compiled = CompiledModule {
            name: "game".to_string(),
            image: b"definitely not a shared library".to_vec(),
            symbols: None,
        };

        match loader.load(&compiled) {
            Err(HotloadError::LoadFailed { path, .. }) => assert!(path.exists()),
            other => panic!("expected LoadFailed, got {:?}", other),
        }
    }
}
