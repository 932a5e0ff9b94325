use crate::compositor::composite_frame;
use crate::error::FilterResult;
use crate::lut::Lut;
use crate::packer::PackedUniformBlock;
use image::RgbaImage;
use parking_lot::RwLock;
use std::sync::Arc;

/// A complete, immutable set of frame inputs.
#[derive(Debug, Clone, Default)]
pub struct PublishedState {
    pub block: PackedUniformBlock,
    pub lut: Option<Arc<Lut>>,
    /// Monotonic per session; 0 is the empty initial state
    pub version: u64,
}

/// Single-writer/single-reader exchange of [`PublishedState`].
///
/// Writers replace the whole `Arc`; readers take one clone per frame, so a
/// frame never sees a half-applied repack.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: RwLock<Arc<PublishedState>>,
}

impl SnapshotCell {
    pub fn new(initial: PublishedState) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn load(&self) -> Arc<PublishedState> {
        Arc::clone(&self.current.read())
    }

    pub fn publish(&self, state: PublishedState) {
        *self.current.write() = Arc::new(state);
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }
}

/// Per-stream render resources. Created when a stream starts and dropped
/// when it stops; never shared between streams.
pub struct RenderContext {
    snapshot: Arc<SnapshotCell>,
    last_version: Option<u64>,
    frames_rendered: u64,
}

impl RenderContext {
    pub fn new(snapshot: Arc<SnapshotCell>) -> Self {
        crate::log_info!("Render context created");
        Self {
            snapshot,
            last_version: None,
            frames_rendered: 0,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Composite one frame against the latest published state.
    pub fn render(&mut self, frame: &RgbaImage) -> FilterResult<RgbaImage> {
        let state = self.snapshot.load();

        if self.last_version != Some(state.version) {
            if let Err(e) = state.block.validate() {
                crate::log_warn!("Uniform block v{} clamped: {}", state.version, e);
            }
            crate::log_debug!(
                "Using uniform block v{} ({} chips, lut: {})",
                state.version,
                state.block.effective_count(),
                state.lut.is_some()
            );
            self.last_version = Some(state.version);
        }

        let out = composite_frame(frame, &state.block, state.lut.as_deref())?;
        self.frames_rendered += 1;
        Ok(out)
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        crate::log_info!("Render context released after {} frames", self.frames_rendered);
    }
}
