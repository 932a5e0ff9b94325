pub mod chip;
pub mod color;
pub mod compositor;
pub mod engine;
pub mod error;
pub mod logger;
pub mod lut;
pub mod packer;
pub mod preset;
pub mod registry;
pub mod render;
pub mod session;
pub mod shader;
pub mod state;

pub use chip::{ChipId, ChipMode, ColorChip, ToleranceField, Tolerances, MAX_CHIPS};
pub use color::{hex_to_rgb, rgb_to_hex, Hsv, Rgb};
pub use compositor::{composite_frame, composite_pixel, CompositedPixel};
pub use engine::{EngineConfig, EngineReport, FilterEngine, FrameSink, FrameSource};
pub use error::{FilterError, FilterResult};
pub use logger::{finalize_logs, get_log_path, init_logger};
pub use lut::Lut;
pub use packer::{pack, PackedUniformBlock, StreamAdjustments, UnselectedTreatment};
pub use preset::{FilterPreset, PresetStore};
pub use registry::ChipRegistry;
pub use session::{FilterCommand, FilterSession};
pub use state::StateManager;
