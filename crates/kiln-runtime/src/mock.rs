use crate::backend::{ContainerRuntime, ContainerSpec, ContainerState};
use crate::RuntimeError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What the entry script of a mock container does once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    Exit(i64),
    /// Never exits on its own; only a kill stops it.
    Hang,
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub started: bool,
    pub running: bool,
    pub exit_code: i64,
    pub killed: bool,
    outcome: ScriptOutcome,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    containers: HashMap<String, MockContainer>,
    images: BTreeSet<String>,
    pushed: Vec<String>,
    ops: Vec<String>,
    outcomes: HashMap<String, ScriptOutcome>,
    failing_pushes: u32,
}

/// In-memory container runtime for tests and dry runs.
///
/// Containers exit with code 0 on the first inspect after start unless an
/// outcome was scripted for their source image. Every call is recorded.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script the outcome of containers created from `image`.
    pub fn set_outcome(&self, image: &str, outcome: ScriptOutcome) {
        self.state().outcomes.insert(image.to_owned(), outcome);
    }

    /// Make the next `n` push attempts fail.
    pub fn fail_pushes(&self, n: u32) {
        self.state().failing_pushes = n;
    }

    pub fn add_image(&self, image: &str) {
        self.state().images.insert(image.to_owned());
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state().images.contains(image)
    }

    pub fn images(&self) -> Vec<String> {
        self.state().images.iter().cloned().collect()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.state().pushed.clone()
    }

    /// Every runtime call so far, formatted as `"<op> <arg>"`.
    pub fn ops(&self) -> Vec<String> {
        self.state().ops.clone()
    }

    /// Containers that were created and not removed.
    pub fn containers(&self) -> Vec<MockContainer> {
        let mut list: Vec<_> = self.state().containers.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn with_container<T>(
        &self,
        op: &str,
        id: &str,
        f: impl FnOnce(&mut MockContainer) -> T,
    ) -> Result<T, RuntimeError> {
        let mut state = self.state();
        state.ops.push(format!("{op} {id}"));
        state
            .containers
            .get_mut(id)
            .map(f)
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_owned()))
    }
}

impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.state();
        state.ops.push(format!("create {}", spec.image));
        if !spec.bind_source.is_dir() {
            return Err(RuntimeError::ExecFailed(format!(
                "bind source {} does not exist",
                spec.bind_source.display()
            )));
        }
        state.next_id += 1;
        let id = format!("mock-{:04}", state.next_id);
        let outcome = state
            .outcomes
            .get(&spec.image)
            .copied()
            .unwrap_or(ScriptOutcome::Exit(0));
        state.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                command: spec.command.clone(),
                started: false,
                running: false,
                exit_code: 0,
                killed: false,
                outcome,
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.with_container("start", id, |c| {
            c.started = true;
            c.running = true;
        })
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        self.with_container("inspect", id, |c| {
            if c.running {
                if let ScriptOutcome::Exit(code) = c.outcome {
                    c.running = false;
                    c.exit_code = code;
                }
            }
            ContainerState {
                running: c.running,
                exit_code: c.exit_code,
            }
        })
    }

    fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.with_container("kill", id, |c| {
            c.running = false;
            c.killed = true;
            c.exit_code = 137;
        })
    }

    fn commit_container(&self, id: &str, image: &str) -> Result<(), RuntimeError> {
        self.with_container("commit", id, |_| ())?;
        self.state().images.insert(image.to_owned());
        Ok(())
    }

    fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.ops.push(format!("remove {id}"));
        state
            .containers
            .remove(id)
            .map(drop)
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_owned()))
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let mut state = self.state();
        state.ops.push(format!("exists {image}"));
        Ok(state.images.contains(image))
    }

    fn push_image(&self, image: &str, _stream: bool) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.ops.push(format!("push {image}"));
        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Err(RuntimeError::ExecFailed(format!(
                "mock push of {image} refused"
            )));
        }
        state.pushed.push(image.to_owned());
        Ok(())
    }

    fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.ops.push(format!("rmi {image}"));
        state.images.remove(image);
        Ok(())
    }
}
