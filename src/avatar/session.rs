use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::controls::OrbitControls;
use super::lip_sync::{LipSync, MOUTH_OPEN_EXPRESSION};
use super::loader::{AssetSource, ModelLoader};
use super::model::AvatarModel;
use super::renderer::Renderer;
use super::scene::{PerspectiveCamera, Scene, Viewport};
use crate::frame::FrameScheduler;

/// Progress of the avatar asset load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadState {
    Pending,
    Ready,
    Failed,
}

/// State of the render loop after its most recent event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSnapshot {
    /// Frames ticked so far (0 before the first frame)
    pub frame: u64,
    /// Delta of the most recent frame, in seconds
    pub delta_secs: f32,
    /// Smoothed mouth-open amplitude
    pub lip_value: f32,
    pub speaking: bool,
    pub load: LoadState,
    pub aspect: f32,
}

impl FrameSnapshot {
    pub fn is_ready(&self) -> bool {
        self.load == LoadState::Ready
    }
}

/// Totals reported when the session is torn down
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderStats {
    pub frames: u64,
    pub frames_with_avatar: u64,
    pub render_errors: u64,
    pub resizes: u64,
    pub final_lip_value: f32,
}

#[derive(Debug, Clone)]
pub struct AvatarOptions {
    /// Asset path of the avatar model, relative to the asset source
    pub asset_path: String,
}

impl Default for AvatarOptions {
    fn default() -> Self {
        Self {
            asset_path: "/ananya.vrm".to_string(),
        }
    }
}

/// A mounted avatar viewer: scene, camera, controls, renderer and frame loop
///
/// The loop runs on its own task and owns all render state. The host talks to
/// it through latest-value cells (speaking flag, viewport) and observes it
/// through [`FrameSnapshot`]s.
pub struct AvatarSession {
    speaking: watch::Sender<bool>,
    viewport: watch::Sender<Viewport>,
    snapshots: watch::Receiver<FrameSnapshot>,
    shutdown: Option<oneshot::Sender<()>>,
    render_task: Option<JoinHandle<RenderStats>>,
}

impl AvatarSession {
    /// Mount a session onto a surface and start loading the avatar
    ///
    /// Must be called from within a Tokio runtime. The frame loop starts
    /// immediately and renders an empty scene until the model arrives.
    pub fn mount(
        viewport: Viewport,
        options: AvatarOptions,
        assets: Arc<dyn AssetSource>,
        mut renderer: Box<dyn Renderer>,
        scheduler: Box<dyn FrameScheduler>,
    ) -> Self {
        info!(
            "Mounting avatar session ({}x{} @{}x, {} renderer, {} frames)",
            viewport.width,
            viewport.height,
            viewport.pixel_ratio,
            renderer.name(),
            scheduler.name()
        );

        let scene = Scene::with_default_lighting();
        let mut camera = PerspectiveCamera::avatar_default(viewport.aspect().unwrap_or(1.0));

        renderer.set_pixel_ratio(viewport.pixel_ratio);
        if viewport.is_empty() {
            debug!("Mounted on an empty surface; waiting for a resize");
        } else {
            renderer.set_size(viewport.width, viewport.height);
        }

        let mut controls = OrbitControls::avatar_default();
        controls.update(&mut camera);

        let (speaking_tx, speaking_rx) = watch::channel(false);
        let (viewport_tx, viewport_rx) = watch::channel(viewport);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (model_tx, model_rx) = mpsc::channel(1);

        let initial = FrameSnapshot {
            frame: 0,
            delta_secs: 0.0,
            lip_value: 0.0,
            speaking: false,
            load: LoadState::Pending,
            aspect: camera.aspect,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        spawn_model_load(ModelLoader::new(assets), options.asset_path, model_tx);

        let render_loop = RenderLoop {
            scheduler,
            models: model_rx,
            viewport: viewport_rx,
            controls,
            renderer,
            scene,
            camera,
            lip: LipSync::new(),
            speaking: speaking_rx,
            snapshot: snapshot_tx,
            shutdown: shutdown_rx,
            load: LoadState::Pending,
            frame: 0,
            stats: RenderStats::default(),
        };

        let render_task = tokio::spawn(render_loop.run());

        Self {
            speaking: speaking_tx,
            viewport: viewport_tx,
            snapshots: snapshot_rx,
            shutdown: Some(shutdown_tx),
            render_task: Some(render_task),
        }
    }

    /// Tell the avatar whether speech is playing; read by the next frame
    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.send_replace(speaking);
    }

    /// Report a new surface size; empty surfaces are ignored
    pub fn resize(&self, viewport: Viewport) {
        if viewport.is_empty() {
            debug!("Ignoring resize to {}x{}", viewport.width, viewport.height);
            return;
        }
        self.viewport.send_replace(viewport);
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshots.borrow().is_ready()
    }

    pub fn lip_value(&self) -> f32 {
        self.snapshots.borrow().lip_value
    }

    /// Observe every snapshot the loop publishes
    pub fn subscribe(&self) -> watch::Receiver<FrameSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until the loop has ticked at least `frame` frames
    pub async fn wait_for_frame(&self, frame: u64) -> Result<FrameSnapshot> {
        self.wait_until(|s| s.frame >= frame).await
    }

    /// Wait until the avatar load has either succeeded or failed
    pub async fn wait_for_load(&self) -> Result<LoadState> {
        let snapshot = self.wait_until(|s| s.load != LoadState::Pending).await?;
        Ok(snapshot.load)
    }

    async fn wait_until(&self, f: impl FnMut(&FrameSnapshot) -> bool) -> Result<FrameSnapshot> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx.wait_for(f).await.context("Render loop has stopped")?;
        Ok(snapshot.clone())
    }

    /// Stop the loop and release render resources
    pub async fn dispose(mut self) -> Result<RenderStats> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let task = self.render_task.take().context("Render loop already joined")?;
        let stats = task.await.context("Render loop panicked")?;

        info!(
            "Avatar session disposed ({} frames, {} with avatar)",
            stats.frames, stats.frames_with_avatar
        );

        Ok(stats)
    }
}

impl Drop for AvatarSession {
    fn drop(&mut self) {
        // The loop tears itself down once it sees the signal
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Load the model in the background and hand it to the loop
///
/// If the session goes away first, the load is abandoned and the model is
/// never attached.
fn spawn_model_load(loader: ModelLoader, path: String, models: mpsc::Sender<AvatarModel>) {
    tokio::spawn(async move {
        tokio::select! {
            result = loader.load(&path) => match result {
                Ok(model) => {
                    if models.send(model).await.is_err() {
                        debug!("Session disposed before {} finished loading; dropping model", path);
                    }
                }
                Err(e) => {
                    warn!("Avatar load failed for {}; rendering without avatar: {:#}", path, e);
                }
            },
            _ = models.closed() => {
                debug!("Session disposed while loading {}; load abandoned", path);
            }
        }
    });
}

struct RenderLoop {
    scheduler: Box<dyn FrameScheduler>,
    models: mpsc::Receiver<AvatarModel>,
    viewport: watch::Receiver<Viewport>,
    controls: OrbitControls,
    renderer: Box<dyn Renderer>,
    scene: Scene,
    camera: PerspectiveCamera,
    lip: LipSync,
    speaking: watch::Receiver<bool>,
    snapshot: watch::Sender<FrameSnapshot>,
    shutdown: oneshot::Receiver<()>,
    load: LoadState,
    frame: u64,
    stats: RenderStats,
}

impl RenderLoop {
    async fn run(mut self) -> RenderStats {
        let mut frames_open = true;
        let mut viewport_open = true;

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown => {
                    debug!("Render loop shutting down after {} frames", self.frame);
                    break;
                }

                loaded = self.models.recv(), if self.load == LoadState::Pending => {
                    self.on_model(loaded);
                }

                changed = self.viewport.changed(), if viewport_open => {
                    match changed {
                        Ok(()) => self.on_resize(),
                        Err(_) => viewport_open = false,
                    }
                }

                frame = self.scheduler.next_frame(), if frames_open => {
                    match frame {
                        Some(delta) => self.tick(delta),
                        None => {
                            debug!("Frame scheduler {} finished", self.scheduler.name());
                            frames_open = false;
                        }
                    }
                }
            }
        }

        self.teardown()
    }

    /// One frame: animation, lip-sync, controls, render
    fn tick(&mut self, delta: Duration) {
        let delta_secs = delta.as_secs_f32();
        self.frame += 1;

        if let Some(model) = self.scene.avatar_mut() {
            model.update(delta_secs);
        }

        let speaking = *self.speaking.borrow();
        self.lip.set_speaking(speaking);
        let lip_value = self.lip.step(delta_secs);
        if let Some(model) = self.scene.avatar_mut() {
            model.set_expression(MOUTH_OPEN_EXPRESSION, lip_value);
        }

        self.controls.update(&mut self.camera);

        match self.renderer.render(&self.scene, &self.camera) {
            Ok(()) => {
                self.stats.frames += 1;
                if self.scene.avatar().is_some() {
                    self.stats.frames_with_avatar += 1;
                }
            }
            Err(e) => {
                self.stats.render_errors += 1;
                if self.stats.render_errors == 1 {
                    warn!("Render failed on frame {}: {:#}", self.frame, e);
                } else {
                    debug!("Render failed on frame {}: {:#}", self.frame, e);
                }
            }
        }

        self.publish(delta_secs, speaking);
    }

    fn on_model(&mut self, loaded: Option<AvatarModel>) {
        match loaded {
            Some(model) => {
                if !model.has_mouth_expression() {
                    warn!("Avatar has no \"{}\" expression; lip-sync will not show", MOUTH_OPEN_EXPRESSION);
                }
                self.scene.attach_avatar(model);
                self.load = LoadState::Ready;
                info!("Avatar attached on frame {}", self.frame);
            }
            None => {
                self.load = LoadState::Failed;
            }
        }
        self.republish();
    }

    fn on_resize(&mut self) {
        let viewport = *self.viewport.borrow_and_update();
        let Some(aspect) = viewport.aspect() else {
            debug!("Ignoring resize to an empty surface");
            return;
        };

        self.camera.aspect = aspect;
        self.camera.update_projection_matrix();
        self.renderer.set_pixel_ratio(viewport.pixel_ratio);
        self.renderer.set_size(viewport.width, viewport.height);
        self.stats.resizes += 1;

        debug!("Resized to {}x{} (aspect {:.3})", viewport.width, viewport.height, aspect);
        self.republish();
    }

    fn publish(&self, delta_secs: f32, speaking: bool) {
        self.snapshot.send_replace(FrameSnapshot {
            frame: self.frame,
            delta_secs,
            lip_value: self.lip.value(),
            speaking,
            load: self.load,
            aspect: self.camera.aspect,
        });
    }

    fn republish(&self) {
        let (delta_secs, speaking) = {
            let last = self.snapshot.borrow();
            (last.delta_secs, last.speaking)
        };
        self.publish(delta_secs, speaking);
    }

    /// Release in reverse order of acquisition, frame callbacks first
    fn teardown(self) -> RenderStats {
        let RenderLoop {
            scheduler,
            models,
            viewport,
            mut controls,
            mut renderer,
            mut scene,
            lip,
            mut stats,
            ..
        } = self;

        drop(scheduler);
        // A load finishing from here on has nowhere to go
        drop(models);
        drop(viewport);
        controls.dispose();
        renderer.dispose();
        scene.detach_avatar();

        stats.final_lip_value = lip.value();
        stats
    }
}
