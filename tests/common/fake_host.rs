//! FakeHost: a recording [`DeviceHost`] + [`Transcoder`] over a temp tree.
//!
//! "Devices" are plain directories under the rig's mount base. Mounting only
//! flips a flag; copying, clearing and transcoding touch real files so the
//! pipeline's verification and idempotency checks see real results.
//!
//! Every call is recorded as a [`Call`] so harnesses can assert on exactly
//! what the pipeline asked the machine to do. Failures, panics, short
//! copies and held (blocked until released) calls can be injected per label
//! or per file name.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use offload_core::ProcessError;
use offload_devices::{DeviceHost, Transcoder};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Mount(String),
    Unmount(PathBuf),
    Copy { source: PathBuf, destination: PathBuf },
    Clear(PathBuf),
    Transcode { source: PathBuf, proxy: PathBuf },
}

#[derive(Default)]
struct State {
    connected: Vec<String>,
    mounted: BTreeSet<PathBuf>,
    calls: Vec<Call>,
    enumerate_error: Option<io::ErrorKind>,
    mount_fails: BTreeSet<String>,
    mount_is_noop: BTreeSet<String>,
    mount_panics: BTreeSet<String>,
    copy_fails: BTreeSet<String>,
    copy_truncates: BTreeSet<String>,
    transcode_fails: BTreeSet<String>,
    mount_gates: BTreeMap<String, Arc<Notify>>,
    transcode_gates: BTreeMap<String, Arc<Notify>>,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<State>,
}

fn failed(program: &str, output: &str) -> ProcessError {
    ProcessError::Failed {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        output: output.to_string(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // -- device presence ------------------------------------------------------

    pub fn connect(&self, label: &str) {
        let mut state = self.lock();
        if !state.connected.iter().any(|l| l == label) {
            state.connected.push(label.to_string());
        }
    }

    pub fn disconnect(&self, label: &str) {
        self.lock().connected.retain(|l| l != label);
    }

    /// Treat `mount_point` as already mounted before the pipeline starts.
    pub fn premount(&self, mount_point: &Path) {
        self.lock().mounted.insert(mount_point.to_path_buf());
    }

    pub fn fail_enumeration(&self, kind: io::ErrorKind) {
        self.lock().enumerate_error = Some(kind);
    }

    // -- fault injection --------------------------------------------------------

    pub fn fail_mount(&self, label: &str) {
        self.lock().mount_fails.insert(label.to_string());
    }

    /// `mount` exits 0 but nothing ends up mounted.
    pub fn mount_without_effect(&self, label: &str) {
        self.lock().mount_is_noop.insert(label.to_string());
    }

    pub fn panic_on_mount(&self, label: &str) {
        self.lock().mount_panics.insert(label.to_string());
    }

    pub fn fail_copy(&self, file_name: &str) {
        self.lock().copy_fails.insert(file_name.to_string());
    }

    /// Copy "succeeds" but writes only part of the file.
    pub fn truncate_copy(&self, file_name: &str) {
        self.lock().copy_truncates.insert(file_name.to_string());
    }

    pub fn fail_transcode(&self, file_name: &str) {
        self.lock().transcode_fails.insert(file_name.to_string());
    }

    /// `mount` for `label` waits until the returned gate is notified.
    pub fn hold_mount(&self, label: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().mount_gates.insert(label.to_string(), gate.clone());
        gate
    }

    /// Transcoding `file_name` waits until the returned gate is notified.
    pub fn hold_transcode(&self, file_name: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().transcode_gates.insert(file_name.to_string(), gate.clone());
        gate
    }

    // -- inspection -------------------------------------------------------------

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn transcodes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Transcode { .. }))
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn is_mounted_now(&self, mount_point: &Path) -> bool {
        self.lock().mounted.contains(mount_point)
    }
}

#[async_trait]
impl DeviceHost for FakeHost {
    async fn connected_labels(&self) -> io::Result<Vec<String>> {
        let state = self.lock();
        match state.enumerate_error {
            Some(kind) => Err(io::Error::new(kind, "injected enumeration failure")),
            None => Ok(state.connected.clone()),
        }
    }

    async fn is_mounted(&self, mount_point: &Path) -> bool {
        self.lock().mounted.contains(mount_point)
    }

    async fn mount(&self, label: &str, mount_point: &Path) -> Result<(), ProcessError> {
        let gate = {
            let mut state = self.lock();
            state.calls.push(Call::Mount(label.to_string()));
            state.mount_gates.get(label).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.lock();
        if state.mount_panics.contains(label) {
            drop(state);
            panic!("injected fault while mounting {label}");
        }
        if state.mount_fails.contains(label) {
            return Err(failed("mount", "mount: special device does not exist"));
        }
        if !state.mount_is_noop.contains(label) {
            state.mounted.insert(mount_point.to_path_buf());
        }
        Ok(())
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), ProcessError> {
        let mut state = self.lock();
        state.calls.push(Call::Unmount(mount_point.to_path_buf()));
        state.mounted.remove(mount_point);
        Ok(())
    }

    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<(), ProcessError> {
        let (fails, truncates) = {
            let mut state = self.lock();
            state.calls.push(Call::Copy {
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
            });
            let name = file_name(source);
            (state.copy_fails.contains(&name), state.copy_truncates.contains(&name))
        };
        if fails {
            return Err(failed("cp", "cp: error writing: No space left on device"));
        }
        let bytes = std::fs::read(source).map_err(|e| failed("cp", &e.to_string()))?;
        let keep = if truncates { bytes.len() / 2 } else { bytes.len() };
        std::fs::write(destination, &bytes[..keep]).map_err(|e| failed("cp", &e.to_string()))
    }

    async fn clear_dir(&self, dir: &Path) -> Result<(), ProcessError> {
        self.lock().calls.push(Call::Clear(dir.to_path_buf()));
        let entries = std::fs::read_dir(dir).map_err(|e| failed("find", &e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| failed("find", &e.to_string()))?.path();
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            removed.map_err(|e| failed("find", &e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FakeHost {
    async fn transcode(&self, source: &Path, proxy: &Path) -> Result<(), ProcessError> {
        let (fails, gate) = {
            let mut state = self.lock();
            state.calls.push(Call::Transcode {
                source: source.to_path_buf(),
                proxy: proxy.to_path_buf(),
            });
            let name = file_name(source);
            (
                state.transcode_fails.contains(&name),
                state.transcode_gates.get(&name).cloned(),
            )
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if fails {
            // Leave a partial output behind, as a crashed encoder would.
            let _ = std::fs::write(proxy, b"partial");
            return Err(failed("ffmpeg", "Conversion failed!"));
        }
        std::fs::write(proxy, b"proxy").map_err(|e| failed("ffmpeg", &e.to_string()))
    }
}
