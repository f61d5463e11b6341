#![allow(dead_code)]

//! In-memory providers shared by the engine integration tests.
//!
//! Every mock appends to one journal so tests can assert on the exact order
//! of external operations. Paths under the scratch directory are recorded
//! relative to it (`/root`, `/key`, ...).

use bootchain_core::provider::{
    ArrayProvider, BlockUnlocker, Credential, CredentialPrompt, ImportRequest, Platform,
    PoolProvider, Services, Subsystem, UnlockRequest, VolumeProvider,
};
use bootchain_core::{BootError, BootResult, InitConfig};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zeroize::Zeroizing;

pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Clone)]
struct Recorder {
    journal: Journal,
    root: PathBuf,
}

impl Recorder {
    fn record(&self, event: impl Into<String>) {
        self.journal.lock().unwrap().push(event.into());
    }

    fn scrub(&self, text: &str) -> String {
        text.replace(&*self.root.to_string_lossy(), "")
    }

    fn show(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => format!("/{}", rel.display()),
            Err(_) => path.display().to_string(),
        }
    }
}

pub struct MockPlatform {
    rec: Recorder,
    pub cmdline: String,
    /// Mount sources whose mount fails.
    pub failing_mounts: HashSet<PathBuf>,
    /// Mount points whose unmount fails.
    pub failing_unmounts: HashSet<PathBuf>,
    pub mounted: Mutex<HashMap<PathBuf, PathBuf>>,
    pub rescue_reasons: Mutex<Vec<String>>,
}

impl Platform for MockPlatform {
    type Error = BootError;

    fn setup_environment(&self) -> BootResult<()> {
        self.rec.record("setup");
        Ok(())
    }

    fn read_cmdline(&self) -> BootResult<String> {
        Ok(self.cmdline.clone())
    }

    fn load_modules(&self, modules: &[String]) -> BootResult<()> {
        self.rec.record(format!("modprobe {}", modules.join(",")));
        Ok(())
    }

    fn start_device_daemon(&self) -> BootResult<()> {
        self.rec.record("udev start");
        Ok(())
    }

    fn settle_devices(&self) -> BootResult<()> {
        self.rec.record("udev settle");
        Ok(())
    }

    fn stop_device_daemon(&self) -> BootResult<()> {
        self.rec.record("udev stop");
        Ok(())
    }

    fn teardown_environment(&self) -> BootResult<()> {
        self.rec.record("teardown");
        Ok(())
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: &str,
    ) -> BootResult<()> {
        let event = format!(
            "mount {} {} {} {options}",
            self.rec.show(source),
            self.rec.show(target),
            fstype.unwrap_or("auto")
        );
        self.rec.record(event);
        if self.failing_mounts.contains(source) {
            return Err(BootError::subsystem(
                Subsystem::Mount,
                format!("mounting {} failed", source.display()),
            ));
        }
        self.mounted
            .lock()
            .unwrap()
            .insert(source.to_path_buf(), target.to_path_buf());
        Ok(())
    }

    fn move_mount(&self, source: &Path, target: &Path) -> BootResult<()> {
        self.rec.record(format!(
            "move {} {}",
            self.rec.show(source),
            self.rec.show(target)
        ));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> BootResult<()> {
        self.rec.record(format!("umount {}", self.rec.show(target)));
        if self.failing_unmounts.contains(target) {
            return Err(BootError::subsystem(
                Subsystem::Mount,
                format!("umount {}: target is busy", target.display()),
            ));
        }
        self.mounted.lock().unwrap().retain(|_, point| point != target);
        Ok(())
    }

    fn unmount_lazy(&self, target: &Path) -> BootResult<()> {
        self.rec.record(format!("umount -l {}", self.rec.show(target)));
        Ok(())
    }

    fn mount_point_of(&self, device: &Path) -> BootResult<Option<PathBuf>> {
        Ok(self.mounted.lock().unwrap().get(device).cloned())
    }

    fn single_user_shell(&self) -> BootResult<()> {
        self.rec.record("single-user shell");
        Ok(())
    }

    fn rescue_shell(&self, reason: &str) {
        self.rec.record("rescue shell");
        self.rescue_reasons.lock().unwrap().push(reason.to_string());
    }

    fn switch_root(&self, new_root: &Path, init: &Path) -> BootResult<()> {
        self.rec.record(format!(
            "switch_root {} {}",
            self.rec.show(new_root),
            init.display()
        ));
        Ok(())
    }
}

pub struct MockPrompt {
    rec: Recorder,
    pub secrets: Mutex<VecDeque<String>>,
    pub lines: Mutex<VecDeque<String>>,
}

impl MockPrompt {
    pub fn push_secret(&self, secret: &str) {
        self.secrets.lock().unwrap().push_back(secret.to_string());
    }

    pub fn push_line(&self, line: &str) {
        self.lines.lock().unwrap().push_back(line.to_string());
    }
}

impl CredentialPrompt for MockPrompt {
    type Error = BootError;

    fn read_secret(&self, prompt: &str) -> BootResult<Zeroizing<String>> {
        self.rec
            .record(format!("secret? {}", self.rec.scrub(prompt.trim())));
        self.secrets
            .lock()
            .unwrap()
            .pop_front()
            .map(Zeroizing::new)
            .ok_or_else(|| BootError::UserInput("console closed".into()))
    }

    fn read_line(&self, prompt: &str) -> BootResult<String> {
        self.rec
            .record(format!("line? {}", self.rec.scrub(prompt.trim())));
        self.lines
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BootError::UserInput("console closed".into()))
    }
}

pub struct MockUnlocker {
    rec: Recorder,
    /// Passphrase accepted for passphrase and gpg unlocks.
    pub passphrase: Vec<u8>,
    pub reject_keyfiles: bool,
    /// Devices that cryptsetup reports as absent.
    pub missing_devices: HashSet<PathBuf>,
    pub active: Mutex<HashSet<String>>,
}

impl BlockUnlocker for MockUnlocker {
    type Error = BootError;

    fn mapping_active(&self, name: &str) -> BootResult<bool> {
        Ok(self.active.lock().unwrap().contains(name))
    }

    fn unlock(&self, request: &UnlockRequest<'_>, credential: Credential<'_>) -> BootResult<()> {
        let described = match credential {
            Credential::Passphrase(_) => "passphrase".to_string(),
            Credential::Keyfile(path) => format!("keyfile {}", self.rec.show(path)),
            Credential::GpgKeyfile { keyfile, .. } => format!("gpg {}", self.rec.show(keyfile)),
        };
        let mut event = format!(
            "unlock {} {} {described}",
            request.name,
            self.rec.show(request.device)
        );
        if !request.options.is_empty() {
            event.push_str(&format!(" [{}]", request.options.join(" ")));
        }
        self.rec.record(event);

        if self.missing_devices.contains(request.device) {
            return Err(BootError::device_not_found("encrypted device", request.device));
        }
        let accepted = match credential {
            Credential::Passphrase(given) => given == self.passphrase.as_slice(),
            Credential::Keyfile(path) => path.is_file() && !self.reject_keyfiles,
            Credential::GpgKeyfile { passphrase, .. } => passphrase == self.passphrase.as_slice(),
        };
        if !accepted {
            return Err(BootError::Credential {
                target: request.name.to_string(),
                reason: "No key available with this passphrase.".into(),
            });
        }
        self.active.lock().unwrap().insert(request.name.to_string());
        Ok(())
    }
}

pub struct MockArrays {
    rec: Recorder,
    pub fail: bool,
}

impl ArrayProvider for MockArrays {
    type Error = BootError;

    fn scan_and_persist(&self) -> BootResult<()> {
        self.rec.record("mdadm scan");
        if self.fail {
            return Err(BootError::subsystem(Subsystem::Raid, "no arrays found"));
        }
        Ok(())
    }

    fn assemble(&self) -> BootResult<()> {
        self.rec.record("mdadm assemble");
        Ok(())
    }
}

pub struct MockVolumes {
    rec: Recorder,
    pub fail: bool,
}

impl VolumeProvider for MockVolumes {
    type Error = BootError;

    fn activate_all(&self) -> BootResult<()> {
        self.rec.record("lvm activate");
        if self.fail {
            return Err(BootError::subsystem(Subsystem::Lvm, "no volume groups found"));
        }
        Ok(())
    }

    fn make_nodes(&self) -> BootResult<()> {
        self.rec.record("lvm mknodes");
        Ok(())
    }
}

pub struct MockPools {
    rec: Recorder,
    pub cache_ok: bool,
    pub read_only_ok: bool,
    pub good_dirs: Vec<PathBuf>,
    /// Cache file content found inside the pool's root filesystem.
    pub snapshot_cache: Option<Vec<u8>>,
    temp_mount: PathBuf,
    cache_relative: PathBuf,
}

impl PoolProvider for MockPools {
    type Error = BootError;

    fn import(&self, request: &ImportRequest<'_>) -> BootResult<()> {
        let (event, ok) = if request.cache_file.is_some() {
            (format!("zpool import {} cache", request.pool), self.cache_ok)
        } else if request.read_only {
            let scope = request
                .search_dir
                .map(|dir| format!(" dir={}", self.rec.show(dir)))
                .unwrap_or_default();
            (
                format!("zpool import {} readonly{scope}", request.pool),
                self.read_only_ok,
            )
        } else {
            let dir = request.search_dir.map(Path::to_path_buf).unwrap_or_default();
            (
                format!("zpool import {} dir={}", request.pool, self.rec.show(&dir)),
                self.good_dirs.contains(&dir),
            )
        };
        self.rec.record(event);
        if ok {
            Ok(())
        } else {
            Err(BootError::subsystem(
                Subsystem::Zfs,
                format!("cannot import '{}': no such pool available", request.pool),
            ))
        }
    }

    fn export(&self, pool: &str) -> BootResult<()> {
        self.rec.record(format!("zpool export {pool}"));
        Ok(())
    }

    fn mount_dataset(&self, dataset: &str, target: &Path, options: &str) -> BootResult<()> {
        self.rec.record(format!(
            "zfs mount {dataset} {} {options}",
            self.rec.show(target)
        ));
        if target == self.temp_mount {
            if let Some(contents) = &self.snapshot_cache {
                let path = target.join(&self.cache_relative);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, contents).unwrap();
            }
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> BootResult<()> {
        self.rec.record(format!("zfs umount {}", self.rec.show(target)));
        Ok(())
    }

    fn settle(&self) -> BootResult<()> {
        self.rec.record("zfs settle");
        Ok(())
    }
}

/// A scratch filesystem plus one of each mock, wired to a shared journal.
pub struct World {
    pub dir: TempDir,
    pub journal: Journal,
    pub config: InitConfig,
    pub platform: MockPlatform,
    pub prompt: MockPrompt,
    pub unlocker: MockUnlocker,
    pub arrays: MockArrays,
    pub volumes: MockVolumes,
    pub pools: MockPools,
}

impl World {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let rec = Recorder {
            journal: journal.clone(),
            root: root.clone(),
        };

        let mut config = InitConfig::default();
        let paths = &mut config.paths;
        paths.new_root = root.join("root");
        paths.key_mount = root.join("key");
        paths.temp_mount = root.join("temp");
        paths.embedded_keyfile = root.join("etc/keyfile");
        paths.zpool_cache = root.join("etc/zfs/zpool.cache");
        paths.mdadm_conf = root.join("etc/mdadm.conf");
        paths.run_dir = root.join("run");
        paths.device_dir = root.join("dev");
        paths.disk_dir = root.join("dev/disk");
        for by in ["by-id", "by-uuid"] {
            fs::create_dir_all(paths.disk_dir.join(by)).unwrap();
        }
        let temp_mount = paths.temp_mount.clone();
        let cache_relative = paths.rootfs_cache_relative();

        Self {
            platform: MockPlatform {
                rec: rec.clone(),
                cmdline: String::new(),
                failing_mounts: HashSet::new(),
                failing_unmounts: HashSet::new(),
                mounted: Mutex::new(HashMap::new()),
                rescue_reasons: Mutex::new(Vec::new()),
            },
            prompt: MockPrompt {
                rec: rec.clone(),
                secrets: Mutex::new(VecDeque::new()),
                lines: Mutex::new(VecDeque::new()),
            },
            unlocker: MockUnlocker {
                rec: rec.clone(),
                passphrase: b"correct horse".to_vec(),
                reject_keyfiles: false,
                missing_devices: HashSet::new(),
                active: Mutex::new(HashSet::new()),
            },
            arrays: MockArrays {
                rec: rec.clone(),
                fail: false,
            },
            volumes: MockVolumes {
                rec: rec.clone(),
                fail: false,
            },
            pools: MockPools {
                rec,
                cache_ok: false,
                read_only_ok: false,
                good_dirs: Vec::new(),
                snapshot_cache: None,
                temp_mount,
                cache_relative,
            },
            config,
            journal,
            dir,
        }
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            platform: &self.platform,
            prompt: &self.prompt,
            unlocker: &self.unlocker,
            arrays: &self.arrays,
            volumes: &self.volumes,
            pools: &self.pools,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Create `rel` (and its parents) with `contents`.
    pub fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// Place an init binary inside the new root.
    pub fn install_init(&self) {
        self.write("root/sbin/init", b"#!/bin/sh\n");
    }

    pub fn events(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}
