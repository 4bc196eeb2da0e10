//! Backend registry and dispatch
//!
//! The manager owns no compilation state. It maps target names to
//! backends, optionally runs a shared IR transform pipeline first, and
//! forwards the module.

use crate::error::BackendError;
use crate::{CodeGen, CompileOptions, CompileOutput, LlvmBackend, LuaBackend, MlirBackend, Target, WasmBackend};
use luascript_ir::{Module, TransformRegistry};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

pub struct BackendManager {
    backends: BTreeMap<Target, Box<dyn CodeGen>>,
    transforms: Option<TransformRegistry>,
}

impl fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendManager")
            .field("targets", &self.targets())
            .field("transforms", &self.transforms)
            .finish()
    }
}

impl Default for BackendManager {
    fn default() -> Self {
        Self::with_defaults(&CompileOptions::default())
    }
}

impl BackendManager {
    /// Manager with no backends registered.
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            transforms: None,
        }
    }

    /// Manager with all four backends configured from `options`.
    pub fn with_defaults(options: &CompileOptions) -> Self {
        let mut manager = Self::new();
        manager.register(LuaBackend::new(options));
        manager.register(WasmBackend::new(options));
        manager.register(LlvmBackend::new(options));
        manager.register(MlirBackend::new(options));
        manager
    }

    /// Registers a backend, replacing any previous one for its target.
    pub fn register<B: CodeGen + 'static>(&mut self, backend: B) {
        let target = backend.target();
        if self.backends.insert(target, Box::new(backend)).is_some() {
            debug!(%target, "replaced backend");
        }
    }

    /// Runs `transforms` over the module before every compilation.
    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = Some(transforms);
        self
    }

    pub fn targets(&self) -> Vec<Target> {
        self.backends.keys().copied().collect()
    }

    fn prepare<'m>(&self, module: &'m Module) -> Result<Cow<'m, Module>, BackendError> {
        match &self.transforms {
            Some(transforms) => {
                let transformed = transforms
                    .apply(module)
                    .map_err(|e| BackendError::Transform(e.to_string()))?;
                debug!(before = module.len(), after = transformed.len(), "shared transforms applied");
                Ok(Cow::Owned(transformed))
            }
            None => Ok(Cow::Borrowed(module)),
        }
    }

    fn unknown(&self, name: &str) -> BackendError {
        BackendError::UnknownTarget {
            name: name.to_string(),
            known: self.targets().iter().map(|t| t.as_str().to_string()).collect(),
        }
    }

    /// Compiles with the backend registered under `name`.
    pub fn compile(&self, module: &Module, name: &str) -> Result<CompileOutput, BackendError> {
        let target: Target = name.parse().map_err(|_| self.unknown(name))?;
        let backend = self.backends.get(&target).ok_or_else(|| self.unknown(name))?;
        let module = self.prepare(module)?;
        let output = backend.compile(&module);
        log_output(&output);
        Ok(output)
    }

    /// Compiles with every registered backend, in target order. One
    /// backend failing does not stop the others.
    pub fn compile_all(&self, module: &Module) -> Vec<CompileOutput> {
        let module = match self.prepare(module) {
            Ok(module) => module,
            Err(e) => return self.all_failed(e),
        };
        info!(targets = self.backends.len(), "compiling all targets");
        self.backends
            .values()
            .map(|backend| {
                let output = backend.compile(&module);
                log_output(&output);
                output
            })
            .collect()
    }

    /// Like [`compile_all`](Self::compile_all) with one thread per backend.
    pub fn compile_all_parallel(&self, module: &Module) -> Vec<CompileOutput> {
        let module = match self.prepare(module) {
            Ok(module) => module,
            Err(e) => return self.all_failed(e),
        };
        let module: &Module = &module;
        info!(targets = self.backends.len(), "compiling all targets in parallel");
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .backends
                .iter()
                .map(|(target, backend)| (*target, scope.spawn(move || backend.compile(module))))
                .collect();
            handles
                .into_iter()
                .map(|(target, handle)| {
                    let output = handle.join().unwrap_or_else(|_| {
                        CompileOutput::failed(
                            target,
                            vec![BackendError::Encoding {
                                backend: target.as_str(),
                                message: "backend panicked".to_string(),
                            }],
                        )
                    });
                    log_output(&output);
                    output
                })
                .collect()
        })
    }

    fn all_failed(&self, error: BackendError) -> Vec<CompileOutput> {
        warn!(%error, "shared transforms failed");
        self.targets()
            .into_iter()
            .map(|target| CompileOutput::failed(target, vec![error.clone()]))
            .collect()
    }
}

fn log_output(output: &CompileOutput) {
    if output.success {
        debug!(target = %output.target, bytes = output.bytes().map_or(0, <[u8]>::len), "backend succeeded");
    } else {
        warn!(target = %output.target, diagnostics = output.diagnostics.len(), "backend failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luascript_ast::build::*;
    use luascript_ir::lower;

    fn add_module() -> Module {
        lower(&program(vec![func(
            "add",
            vec![pid("a"), pid("b")],
            vec![ret(Some(bin("+", ident("a"), ident("b"))))],
        )]))
        .unwrap()
    }

    #[test]
    fn test_default_targets() {
        let manager = BackendManager::default();
        assert_eq!(manager.targets(), Target::ALL.to_vec());
    }

    #[test]
    fn test_compile_by_name() {
        let manager = BackendManager::default();
        let module = add_module();
        let lua = manager.compile(&module, "lua").unwrap();
        assert!(lua.success);
        assert!(lua.text().unwrap().contains("return a + b"));

        let wasm = manager.compile(&module, "wasm").unwrap();
        assert!(wasm.success);
        assert!(!wasm.bytes().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let mut manager = BackendManager::new();
        manager.register(LuaBackend::default());
        match manager.compile(&add_module(), "wasm") {
            Err(BackendError::UnknownTarget { name, known }) => {
                assert_eq!(name, "wasm");
                assert_eq!(known, vec!["lua"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            manager.compile(&add_module(), "jvm"),
            Err(BackendError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn test_compile_all_isolates_failures() {
        let module = lower(&program(vec![const_("greeting", str_lit("hi"))])).unwrap();
        let outputs = BackendManager::default().compile_all(&module);
        let by_target: BTreeMap<Target, bool> = outputs.iter().map(|o| (o.target, o.success)).collect();
        assert_eq!(by_target[&Target::Lua], true);
        assert_eq!(by_target[&Target::Mlir], true);
        assert_eq!(by_target[&Target::Wasm], false);
        assert_eq!(by_target[&Target::Llvm], false);
        let wasm = outputs.iter().find(|o| o.target == Target::Wasm).unwrap();
        assert!(wasm.output.is_none());
        assert!(!wasm.diagnostics.is_empty());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let manager = BackendManager::default();
        let module = add_module();
        let sequential = manager.compile_all(&module);
        let parallel = manager.compile_all_parallel(&module);
        assert_eq!(sequential.len(), parallel.len());
        for (a, b) in sequential.iter().zip(&parallel) {
            assert_eq!(a.target, b.target);
            assert_eq!(a.success, b.success);
            assert_eq!(a.output, b.output);
        }
    }

    #[test]
    fn test_shared_transforms_run_first() {
        let module = lower(&program(vec![func(
            "f",
            vec![],
            vec![ret(Some(bin("*", num(6.0), num(7.0))))],
        )]))
        .unwrap();
        let mut manager = BackendManager::new().with_transforms(TransformRegistry::standard());
        manager.register(LuaBackend::default());
        let lua = manager.compile(&module, "lua").unwrap();
        assert!(lua.text().unwrap().contains("return 42"), "{}", lua.text().unwrap());
    }
}
