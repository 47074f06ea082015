use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use class_change::compile::{CompileError, CompiledClasses, Compiler};
use class_change::fallback::{
    LifecycleEvent, LifecycleListener, ListenerId, ServiceController, ServiceError, ServiceMode,
};
use class_change::loader::{ClassLoadError, DeploymentClassLoader, LoadedClass, LoaderId};
use class_change::reconcile::{AddedClass, ClassDefinition};
use class_change::redefine::{RedefinitionAgent, RedefinitionError, RedefinitionReport};

/// Minimal class file declaring `name` as a subclass of `java.lang.Object`.
pub fn class_bytes(name: &str) -> Vec<u8> {
    fn utf8(pool: &mut Vec<u8>, text: &str) {
        pool.push(1);
        pool.extend_from_slice(&(text.len() as u16).to_be_bytes());
        pool.extend_from_slice(text.as_bytes());
    }
    let mut pool = Vec::new();
    utf8(&mut pool, &name.replace('.', "/"));
    pool.extend_from_slice(&[7, 0, 1]);
    utf8(&mut pool, "java/lang/Object");
    pool.extend_from_slice(&[7, 0, 3]);

    let mut out = Vec::new();
    out.extend_from_slice(&0xCAFE_BABE_u32.to_be_bytes());
    out.extend_from_slice(&0_u16.to_be_bytes());
    out.extend_from_slice(&61_u16.to_be_bytes());
    out.extend_from_slice(&5_u16.to_be_bytes());
    out.extend_from_slice(&pool);
    out.extend_from_slice(&0x0021_u16.to_be_bytes());
    out.extend_from_slice(&2_u16.to_be_bytes());
    out.extend_from_slice(&4_u16.to_be_bytes());
    out.extend_from_slice(&0_u16.to_be_bytes());
    out
}

/// Loader whose first lookup fails, as if the class were not yet visible.
#[derive(Debug)]
pub struct FlakyLoader {
    id: LoaderId,
    fail_next: AtomicBool,
}

impl Default for FlakyLoader {
    fn default() -> Self {
        Self {
            id: LoaderId::next(),
            fail_next: AtomicBool::new(true),
        }
    }
}

impl DeploymentClassLoader for FlakyLoader {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn load_class(&self, name: &str) -> Result<LoadedClass, ClassLoadError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ClassLoadError::NotFound {
                name: name.to_string(),
                loader: self.id,
            });
        }
        Ok(LoadedClass {
            name: name.to_string(),
            loader: self.id,
        })
    }

    fn class_path(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Compiler that emits a synthetic class per requested source and records each call.
#[derive(Default)]
pub struct SyntheticCompiler {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub fail: bool,
}

impl SyntheticCompiler {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Compiler for SyntheticCompiler {
    fn compile(
        &self,
        _loader: &dyn DeploymentClassLoader,
        source_root: &Path,
        base_names: &[String],
    ) -> Result<CompiledClasses, CompileError> {
        self.calls.lock().unwrap().push(base_names.to_vec());
        if self.fail {
            return Err(CompileError::Failed {
                diagnostics: "error: ';' expected".to_string(),
            });
        }
        base_names
            .iter()
            .map(|base| {
                assert!(source_root.join(format!("{base}.java")).is_file());
                Ok((base.clone(), class_bytes(&base.replace('/', "."))))
            })
            .collect()
    }
}

/// Agent that accepts every batch and records the submitted names.
#[derive(Default)]
pub struct AcceptingAgent {
    pub batches: Mutex<Vec<(Vec<String>, Vec<String>)>>,
}

impl AcceptingAgent {
    pub fn batches(&self) -> Vec<(Vec<String>, Vec<String>)> {
        self.batches.lock().unwrap().clone()
    }
}

impl RedefinitionAgent for AcceptingAgent {
    fn redefine(
        &self,
        modified: &[ClassDefinition],
        added: &[AddedClass],
    ) -> Result<RedefinitionReport, RedefinitionError> {
        self.batches.lock().unwrap().push((
            modified.iter().map(|class| class.class.name.clone()).collect(),
            added.iter().map(|class| class.name.clone()).collect(),
        ));
        Ok(RedefinitionReport::for_batch(modified, added))
    }
}

/// Controller that stops synchronously and records every mode change.
#[derive(Default)]
pub struct RecordingController {
    pub modes: Mutex<Vec<ServiceMode>>,
    listeners: Mutex<Vec<(ListenerId, Arc<LifecycleListener>)>>,
    pub fail_stability: bool,
}

impl RecordingController {
    pub fn failing_stability() -> Self {
        Self {
            fail_stability: true,
            ..Self::default()
        }
    }

    pub fn modes(&self) -> Vec<ServiceMode> {
        self.modes.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    fn emit(&self, event: LifecycleEvent) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(self, event);
        }
    }
}

impl ServiceController for RecordingController {
    fn set_mode(&self, mode: ServiceMode) -> Result<(), ServiceError> {
        self.modes.lock().unwrap().push(mode);
        match mode {
            ServiceMode::Never => self.emit(LifecycleEvent::Down),
            ServiceMode::Active => self.emit(LifecycleEvent::Up),
        }
        Ok(())
    }

    fn add_lifecycle_listener(&self, listener: LifecycleListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        id
    }

    fn remove_lifecycle_listener(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|(existing, _)| *existing != id);
    }

    fn await_stability(&self) -> Result<(), ServiceError> {
        if self.fail_stability {
            return Err(ServiceError::Failed {
                name: "app.war".to_string(),
                reason: "container refused to settle".to_string(),
            });
        }
        Ok(())
    }
}
