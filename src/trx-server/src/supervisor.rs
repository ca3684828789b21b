// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Decoder process supervisor (§4.6). Reacts to `BackendEvent`s by standing
//! up or tearing down a channel's UDP ingest, HRD server, config file, and
//! decoder child process; reacts to the state core's heartbeat-driven
//! `RestartRequest`s by respawning within the restart policy. Spawn/wait
//! uses `kill_on_drop(false)` -- shutdown is explicit (§5), never implicit
//! in a dropped handle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use trx_backend::{BackendEvent, SliceInfo};
use trx_core::channel::{audio_rx_for_index, hrd_port_for_index, letter_for_index, udp_port_for_index};
use trx_core::{DecoderInstance, OperatingMode};

use crate::app::AppState;
use crate::hrd_server;
use crate::qso_driver::{self, ChannelCommand};
use crate::udp_ingest;

const SPAWN_GRACE_SECS: u64 = 5;
const RESTART_WAIT_SECS: u64 = 3;

/// Where generated decoder config files and any future per-instance
/// artifacts live.
pub struct SupervisorConfig {
    pub decoder_path: PathBuf,
    pub config_dir: PathBuf,
    pub wsjtx_udp_server: String,
    /// `standard` mode (§6) runs one hard-coded "IC-7300" channel instead
    /// of the flex multi-slice "wsjtx-{letter}" naming; `None` in flex mode.
    pub standard_instance_name: Option<String>,
    /// §6's `flex.default-bands`: one frequency per channel index, used to
    /// pre-tune a slice that appears with no frequency of its own yet.
    pub default_bands: Vec<u64>,
}

impl SupervisorConfig {
    fn instance_name(&self, index: u8) -> String {
        match (&self.standard_instance_name, index) {
            (Some(name), 0) => name.clone(),
            _ => format!("wsjtx-{}", letter_for_index(index)),
        }
    }
}

struct RunningInstance {
    child: Child,
    freq_hz: u64,
    mode: OperatingMode,
}

pub struct Supervisor {
    cfg: SupervisorConfig,
    app: Arc<AppState>,
    instances: Mutex<HashMap<u8, RunningInstance>>,
}

impl Supervisor {
    pub fn new(cfg: SupervisorConfig, app: Arc<AppState>) -> Arc<Self> {
        Arc::new(Self { cfg, app, instances: Mutex::new(HashMap::new()) })
    }

    /// Drive the supervisor from the backend's event stream until the
    /// channel closes (backend task exit).
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<BackendEvent>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                supervisor.handle_event(event).await;
            }
        });
    }

    async fn handle_event(self: &Arc<Self>, event: BackendEvent) {
        match event {
            BackendEvent::Connected => {
                self.app.core.lock().expect("state core mutex never poisoned").set_backend_connected(true);
            }
            BackendEvent::Disconnected => {
                self.app.core.lock().expect("state core mutex never poisoned").set_backend_connected(false);
            }
            BackendEvent::SliceAdded(info) | BackendEvent::SliceUpdated(info) => {
                let already_running = self.instances.lock().await.contains_key(&info.slice_index);
                if !already_running {
                    self.start_channel(info).await;
                } else {
                    self.app.core.lock().expect("state core mutex never poisoned").update_from_backend(
                        info.slice_index,
                        Some(info.freq_hz),
                        Some(info.mode),
                        Some(info.is_tx),
                        Some(info.audio_rx),
                    );
                }
            }
            BackendEvent::SliceRemoved { slice_index } => {
                self.stop_channel(slice_index).await;
            }
            BackendEvent::Error(message) => {
                warn!("radio backend reported an error: {message}");
            }
        }
    }

    /// Steps 1-8 of §4.6's slice-added sequence.
    async fn start_channel(self: &Arc<Self>, info: SliceInfo) {
        let index = info.slice_index;
        let audio_rx = audio_rx_for_index(index);
        let hrd_port = hrd_port_for_index(index);
        let udp_port = udp_port_for_index(index);

        let mut freq_hz = info.freq_hz;
        if freq_hz == 0 {
            if let Some(&band_hz) = self.cfg.default_bands.get(index as usize) {
                if self.app.backend.is_connected() {
                    if let Err(err) = self.app.backend.tune_slice(index, band_hz).await {
                        warn!(channel = index, "failed to pre-tune slice to default band: {err}");
                    }
                }
                freq_hz = band_hz;
            }
        }

        if let Err(err) = self.app.backend.set_slice_audio(index, audio_rx).await {
            warn!(channel = index, "failed to set slice audio channel: {err}");
        }

        if let Err(err) = hrd_server::spawn_listener(hrd_port, Some(index), self.app.clone()).await {
            warn!(channel = index, "failed to start per-channel HRD server: {err}");
            return;
        }

        let socket = match udp_ingest::bind(index, udp_port).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(channel = index, "failed to bind UDP ingest socket: {err}");
                return;
            }
        };
        udp_ingest::spawn(index, socket.clone(), self.app.clone());

        let (tx, rx) = mpsc::unbounded_channel::<ChannelCommand>();
        {
            let mut core = self.app.core.lock().expect("state core mutex never poisoned");
            core.update_from_backend(index, Some(freq_hz), Some(info.mode.clone()), Some(info.is_tx), Some(audio_rx));
        }
        let instance_name = self.cfg.instance_name(index);
        qso_driver::spawn(index, instance_name.clone(), socket, self.app.clone(), rx);
        self.app.set_channel_sender(index, tx);

        self.write_config(index, &instance_name, freq_hz, &info.mode);

        match self.spawn_decoder(index, &instance_name).await {
            Ok(child) => {
                let pid = child.id().unwrap_or(0);
                self.app
                    .core
                    .lock()
                    .expect("state core mutex never poisoned")
                    .register_instance(index, DecoderInstance::new(instance_name.clone(), index));
                self.app.core.lock().expect("state core mutex never poisoned").set_instance_pid(index, pid, crate::app::now_ms());
                self.instances.lock().await.insert(index, RunningInstance { child, freq_hz, mode: info.mode.clone() });
                info!(channel = index, pid, "decoder instance started");
            }
            Err(err) => {
                warn!(channel = index, "failed to spawn decoder process: {err}");
                self.app
                    .core
                    .lock()
                    .expect("state core mutex never poisoned")
                    .instance_stopped(index, Some(err.to_string()));
                return;
            }
        }

        self.spawn_window_tiling(index);
    }

    /// Process-exit shutdown (§5/§4.7): terminate every still-running
    /// decoder instance gracefully. Callers send Close UDP frames and wait
    /// out the 2 s protocol grace period before calling this.
    pub async fn shutdown_all(&self) {
        let mut instances = self.instances.lock().await;
        for (index, mut running) in instances.drain() {
            terminate_gracefully(&mut running.child, index).await;
        }
    }

    async fn stop_channel(&self, index: u8) {
        let mut instances = self.instances.lock().await;
        if let Some(mut running) = instances.remove(&index) {
            terminate_gracefully(&mut running.child, index).await;
        }
        self.app.clear_channel_sender(index);
        self.app.core.lock().expect("state core mutex never poisoned").instance_stopped(index, None);
        self.app.core.lock().expect("state core mutex never poisoned").unregister_instance(index);
        info!(channel = index, "decoder instance stopped and unregistered");
    }

    /// Restart policy entry point: called from the heartbeat-watchdog task
    /// with the state core's `RestartRequest`s.
    pub async fn restart_channel(self: &Arc<Self>, index: u8, instance_name: &str) {
        let (freq_hz, mode) = {
            let instances = self.instances.lock().await;
            match instances.get(&index) {
                Some(running) => (running.freq_hz, running.mode.clone()),
                None => (0, OperatingMode::default()),
            }
        };
        {
            let mut instances = self.instances.lock().await;
            if let Some(mut running) = instances.remove(&index) {
                terminate_gracefully(&mut running.child, index).await;
            }
        }

        self.write_config(index, instance_name, freq_hz, &mode);
        match self.spawn_decoder(index, instance_name).await {
            Ok(child) => {
                let pid = child.id().unwrap_or(0);
                self.app.core.lock().expect("state core mutex never poisoned").set_instance_pid(index, pid, crate::app::now_ms());
                self.instances.lock().await.insert(index, RunningInstance { child, freq_hz, mode });
                info!(channel = index, pid, "decoder instance restarted");
            }
            Err(err) => {
                warn!(channel = index, "restart attempt failed to spawn: {err}");
                self.app
                    .core
                    .lock()
                    .expect("state core mutex never poisoned")
                    .instance_stopped(index, Some(err.to_string()));
            }
        }
    }

    /// Graceful restart-all for config changes (§4.6): snapshot, close,
    /// stop, wait, regenerate, respawn in channel order.
    pub async fn restart_all(self: &Arc<Self>) {
        let snapshot: Vec<(u8, String, u64, OperatingMode)> = {
            let instances = self.instances.lock().await;
            let core = self.app.core.lock().expect("state core mutex never poisoned");
            instances
                .iter()
                .map(|(index, running)| {
                    let name = core.instance(*index).map(|i| i.name.clone()).unwrap_or_else(|| self.cfg.instance_name(*index));
                    (*index, name, running.freq_hz, running.mode.clone())
                })
                .collect()
        };

        for (index, _, _, _) in &snapshot {
            self.app.send_to_channel(*index, ChannelCommand::Close);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        {
            let mut instances = self.instances.lock().await;
            for (index, running) in instances.iter_mut() {
                terminate_gracefully(&mut running.child, *index).await;
            }
            instances.clear();
        }

        tokio::time::sleep(Duration::from_secs(RESTART_WAIT_SECS)).await;

        for (index, name, freq_hz, mode) in snapshot {
            self.write_config(index, &name, freq_hz, &mode);
            match self.spawn_decoder(index, &name).await {
                Ok(child) => {
                    let pid = child.id().unwrap_or(0);
                    self.app.core.lock().expect("state core mutex never poisoned").set_instance_pid(index, pid, crate::app::now_ms());
                    self.instances.lock().await.insert(index, RunningInstance { child, freq_hz, mode });
                }
                Err(err) => warn!(channel = index, "failed to respawn during config-change restart: {err}"),
            }
            self.spawn_window_tiling(index);
        }
    }

    /// §6's decoder config template: rig type, CAT endpoint, PTT method,
    /// audio device names, UDP port, station identity, and the two
    /// mandatory hands-off-operation keys.
    fn write_config(&self, index: u8, instance_name: &str, freq_hz: u64, mode: &OperatingMode) {
        let letter = letter_for_index(index);
        let hrd_port = hrd_port_for_index(index);
        let udp_port = udp_port_for_index(index);
        let audio_rx = audio_rx_for_index(index);

        let contents = format!(
            "[Configuration]\n\
             RigName=Ham Radio Deluxe\n\
             RigControlHost=127.0.0.1\n\
             RigControlPort={hrd_port}\n\
             PTTMethod=CAT\n\
             AudioInputDevice=DAX Audio RX {audio_rx}\n\
             AudioOutputDevice=DAX Audio TX\n\
             UDPServerPort={udp_port}\n\
             UDPServer={wsjtx_udp_server}\n\
             MyCall={callsign}\n\
             MyGrid={grid}\n\
             HoldTxFreq=true\n\
             AutoSeq=true\n\
             DefaultMode=FT8\n\
             Frequency={freq_hz}\n\
             Mode={mode}\n\
             WaterfallWidthHz=2500\n",
            wsjtx_udp_server = self.cfg.wsjtx_udp_server,
            callsign = self.app.station.callsign,
            grid = self.app.my_grid.clone().unwrap_or_default(),
            freq_hz = freq_hz,
            mode = mode,
        );

        if let Err(err) = std::fs::create_dir_all(&self.cfg.config_dir) {
            warn!(channel = index, "failed to create decoder config directory: {err}");
            return;
        }
        let path = self.cfg.config_dir.join(format!("{instance_name}.ini"));
        if let Err(err) = std::fs::write(&path, contents) {
            warn!(channel = index, "failed to write decoder config {}: {err}", path.display());
            return;
        }
        debug!(channel = index, letter = %letter, path = %path.display(), "wrote decoder config");
    }

    async fn spawn_decoder(&self, index: u8, instance_name: &str) -> std::io::Result<Child> {
        let hrd_port = hrd_port_for_index(index);
        let config_path = self.cfg.config_dir.join(format!("{instance_name}.ini"));
        Command::new(&self.cfg.decoder_path)
            .arg("--rig")
            .arg("Ham Radio Deluxe")
            .arg("--rig-control-port")
            .arg(hrd_port.to_string())
            .arg("--config")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
    }

    /// Best-effort tiled window placement (§4.6 step 8); never affects
    /// channel status on failure.
    fn spawn_window_tiling(&self, index: u8) {
        tokio::spawn(async move {
            let letter = letter_for_index(index);
            let col = index % 2;
            let row = index / 2;
            let x = col as i32 * 640;
            let y = row as i32 * 480;
            let result = Command::new("wmctrl")
                .arg("-r")
                .arg(format!("WSJT-X - {letter}"))
                .arg("-e")
                .arg(format!("0,{x},{y},640,480"))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(false)
                .status()
                .await;
            if let Err(err) = result {
                warn!(channel = index, "window tiling best-effort attempt failed: {err}");
            }
        });
    }
}

async fn terminate_gracefully(child: &mut Child, index: u8) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is this child's own, still-valid process id; SIGTERM
        // asks it to exit before the hard `kill()` fallback below.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    let graceful = tokio::time::timeout(Duration::from_secs(SPAWN_GRACE_SECS), child.wait()).await;
    if graceful.is_err() {
        warn!(channel = index, "decoder did not exit within grace period, killing");
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}
