//! Fake container runtime CLI for process-level tests.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use tempfile::TempDir;

use crate::config::RuntimeConfig;

const SCRIPT: &str = r#"#!/bin/sh
STATE="__STATE__"
echo "$*" >> "$STATE/calls.log"
cmd="$1"
shift

last_arg() {
  for a in "$@"; do l="$a"; done
  printf '%s' "$l"
}

maybe_slow() {
  if [ -f "$STATE/slow" ]; then
    if ! mkdir "$STATE/busy" 2>/dev/null; then
      touch "$STATE/overlap"
    fi
    sleep "$(cat "$STATE/slow")"
    rmdir "$STATE/busy" 2>/dev/null
  fi
}

no_such() {
  echo "Error response from daemon: No such container: $1" >&2
  exit 1
}

case "$cmd" in
  version)
    echo "24.0.7"
    ;;
  run)
    maybe_slow
    if [ -f "$STATE/fail_run" ]; then
      cat "$STATE/fail_run" >&2
      exit 125
    fi
    name=""
    prev=""
    for a in "$@"; do
      if [ "$prev" = "--name" ]; then name="$a"; fi
      prev="$a"
    done
    id=$(printf 'c%011d%052d' "$$" 0)
    short=$(printf '%s' "$id" | cut -c1-12)
    touch "$STATE/exists/$short" "$STATE/running/$short"
    printf '%s' "$id" > "$STATE/names/$name"
    if [ -f "$STATE/quiet_run" ]; then
      echo "warning: id suppressed" >&2
      exit 0
    fi
    echo "$id"
    ;;
  ps)
    pat=$(last_arg "$@")
    pat=${pat#"name=^/?"}
    pat=${pat%\$}
    name=$(printf '%s' "$pat" | sed 's/\\\././g')
    if [ -f "$STATE/lost_names" ]; then exit 0; fi
    if [ -f "$STATE/names/$name" ]; then cat "$STATE/names/$name"; echo; fi
    ;;
  inspect)
    id=$(last_arg "$@")
    if [ -f "$STATE/running/$id" ]; then echo "true"
    elif [ -f "$STATE/exists/$id" ]; then echo "false"
    else
      echo "Error: No such object: $id" >&2
      exit 1
    fi
    ;;
  stats)
    if [ -f "$STATE/stats_output" ]; then cat "$STATE/stats_output"
    else
      echo '{"BlockIO":"1.2MB / 0B","CPUPerc":"3.25%","Container":"x","ID":"x","MemPerc":"12.5%","MemUsage":"64MiB / 512MiB","Name":"x","NetIO":"4.1kB / 2kB","PIDs":"12"}'
    fi
    ;;
  stop|kill)
    maybe_slow
    id=$(last_arg "$@")
    [ -f "$STATE/exists/$id" ] || no_such "$id"
    rm -f "$STATE/running/$id"
    echo "$id"
    ;;
  start|restart)
    maybe_slow
    id=$(last_arg "$@")
    [ -f "$STATE/exists/$id" ] || no_such "$id"
    touch "$STATE/running/$id"
    echo "$id"
    ;;
  rm)
    maybe_slow
    id=$(last_arg "$@")
    [ -f "$STATE/exists/$id" ] || no_such "$id"
    if [ -f "$STATE/running/$id" ]; then
      echo "Error response from daemon: cannot remove container $id: container is running" >&2
      exit 1
    fi
    rm -f "$STATE/exists/$id"
    echo "$id"
    ;;
  exec)
    id="$1"
    shift
    [ -f "$STATE/running/$id" ] || no_such "$id"
    echo "exec:$*"
    ;;
  attach)
    id=$(last_arg "$@")
    [ -f "$STATE/running/$id" ] || no_such "$id"
    echo "$$" >> "$STATE/attach.pids"
    if [ -f "$STATE/attach_deaf" ]; then exec sleep 30; fi
    if [ -f "$STATE/attach_mixed" ]; then
      echo O1; echo E1 >&2; echo O2; echo E2 >&2; echo O3
      exit 0
    fi
    if [ -f "$STATE/attach_output" ]; then cat "$STATE/attach_output"; fi
    if [ -f "$STATE/attach_exit" ]; then exit 0; fi
    while IFS= read -r line; do
      echo "echo:$line"
    done
    ;;
  *)
    echo "unknown command: $cmd" >&2
    exit 2
    ;;
esac
"#;

pub(crate) struct FakeRuntime {
    dir: TempDir,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = dir.path().join("state");
        for sub in ["exists", "running", "names"] {
            fs::create_dir_all(state.join(sub)).expect("create state dir");
        }
        let script = SCRIPT.replace("__STATE__", &state.display().to_string());
        let bin = dir.path().join("fake-docker");
        fs::write(&bin, script).expect("write fake runtime");
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).expect("chmod");

        // A concurrent fork can briefly hold the write fd (ETXTBSY); wait it out.
        for _ in 0..50 {
            if std::process::Command::new(&bin).arg("version").output().is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        let _ = fs::remove_file(state.join("calls.log"));

        Self { dir }
    }

    pub fn bin(&self) -> PathBuf {
        self.dir.path().join("fake-docker")
    }

    pub fn state(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn data_root(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn config(&self) -> RuntimeConfig {
        let mut cfg = RuntimeConfig::with_data_root(self.data_root());
        cfg.runtime_bin = self.bin().display().to_string();
        cfg.command_timeout = Duration::from_secs(10);
        cfg.stats_timeout = Duration::from_secs(5);
        cfg.rcon_password = "test-rcon".to_string();
        cfg
    }

    pub fn flag(&self, name: &str, contents: &str) {
        fs::write(self.state().join(name), contents).expect("write flag");
    }

    pub fn clear(&self, name: &str) {
        let _ = fs::remove_file(self.state().join(name));
    }

    pub fn has(&self, name: &str) -> bool {
        self.state().join(name).exists()
    }

    pub fn set_running(&self, id: &str, running: bool) {
        let state = self.state();
        fs::write(state.join("exists").join(id), "").expect("mark exists");
        let marker = state.join("running").join(id);
        if running {
            fs::write(marker, "").expect("mark running");
        } else {
            let _ = fs::remove_file(marker);
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state().join("exists").join(id).exists()
    }

    pub fn calls(&self) -> Vec<String> {
        read_lines(&self.state().join("calls.log"))
    }

    pub fn attach_pids(&self) -> Vec<i32> {
        read_lines(&self.state().join("attach.pids"))
            .iter()
            .filter_map(|l| l.trim().parse().ok())
            .collect()
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Whether a pid still names a live (or unreaped) process.
pub(crate) fn pid_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}
