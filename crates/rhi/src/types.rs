//! Backend-neutral value types shared by every RHI object.
//!
//! Nothing in this module touches a graphics API. The Vulkan backend
//! converts these into `ash::vk` values in its `conv` module; the headless
//! backend uses them as they are.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The graphics backends this crate can dispatch to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Vulkan through `ash`. Requires the `vulkan` feature.
    Vulkan,
    /// CPU-simulated device used by tests and CI.
    Headless,
}

impl Backend {
    /// Returns true when this backend was compiled into the crate.
    pub fn is_available(self) -> bool {
        match self {
            Backend::Vulkan => cfg!(feature = "vulkan"),
            Backend::Headless => true,
        }
    }

    /// Returns the backend name.
    pub fn name(self) -> &'static str {
        match self {
            Backend::Vulkan => "vulkan",
            Backend::Headless => "headless",
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "vulkan") {
            Backend::Vulkan
        } else {
            Backend::Headless
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Texel and vertex attribute formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgb10A2Unorm,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    R32Uint,
    /// 24-bit depth, padded to 32 bits.
    Depth24,
    Depth32F,
    Depth24Stencil8,
    Depth32FStencil8,
}

impl Format {
    /// Returns true for formats with a depth component.
    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::Depth24 | Format::Depth32F | Format::Depth24Stencil8 | Format::Depth32FStencil8
        )
    }

    /// Returns true for formats with a stencil component.
    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::Depth24Stencil8 | Format::Depth32FStencil8)
    }

    /// Returns true for sRGB-encoded color formats.
    #[inline]
    pub fn is_srgb(self) -> bool {
        matches!(self, Format::Rgba8Srgb | Format::Bgra8Srgb)
    }

    /// Size of one texel in bytes.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Format::R8Unorm => 1,
            Format::Rg8Unorm => 2,
            Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Unorm
            | Format::Bgra8Srgb
            | Format::Rgb10A2Unorm
            | Format::R32Float
            | Format::R32Uint
            | Format::Depth24
            | Format::Depth32F
            | Format::Depth24Stencil8 => 4,
            Format::Rgba16Float | Format::Rg32Float | Format::Depth32FStencil8 => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
        }
    }
}

/// Width and height in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true when either dimension is zero (a minimized window).
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamps both dimensions into `[min, max]`.
    pub fn clamp(&self, min: Extent2D, max: Extent2D) -> Extent2D {
        Extent2D {
            width: self.width.clamp(min.width, max.width.max(min.width)),
            height: self.height.clamp(min.height, max.height.max(min.height)),
        }
    }
}

impl std::fmt::Display for Extent2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Dynamic viewport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-extent viewport with a `[0, 1]` depth range.
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Integer rectangle, used for scissors and render areas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }
}

/// Index buffer element type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    #[inline]
    pub fn size(self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Primary buffers are submitted to queues; secondary buffers are executed
/// from a primary one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    #[default]
    Primary,
    Secondary,
}

/// How the commands of a subpass are provided.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubpassContents {
    #[default]
    Inline,
    SecondaryCommandBuffers,
}

/// What happens to an attachment's contents when a render pass begins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOp {
    Load,
    #[default]
    Clear,
    DontCare,
}

/// What happens to an attachment's contents when a render pass ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

/// Pipeline kind a pipeline is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
    Task,
    Mesh,
}

impl ShaderStage {
    /// Returns the single-bit stage mask of this stage.
    pub fn flag(self) -> ShaderStages {
        match self {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::TessControl => ShaderStages::TESS_CONTROL,
            ShaderStage::TessEvaluation => ShaderStages::TESS_EVALUATION,
            ShaderStage::Geometry => ShaderStages::GEOMETRY,
            ShaderStage::Fragment => ShaderStages::FRAGMENT,
            ShaderStage::Compute => ShaderStages::COMPUTE,
            ShaderStage::Task => ShaderStages::TASK,
            ShaderStage::Mesh => ShaderStages::MESH,
        }
    }

    /// Returns the human-readable name of this stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEvaluation => "tessellation evaluation",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Task => "task",
            ShaderStage::Mesh => "mesh",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of shader stages. Bit values match `VkShaderStageFlags`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 0x1;
        const TESS_CONTROL = 0x2;
        const TESS_EVALUATION = 0x4;
        const GEOMETRY = 0x8;
        const FRAGMENT = 0x10;
        const COMPUTE = 0x20;
        const ALL_GRAPHICS = 0x1F;
        const TASK = 0x40;
        const MESH = 0x80;
    }
}

bitflags! {
    /// Ways a buffer may be used. Bit values match `VkBufferUsageFlags`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 0x1;
        const TRANSFER_DST = 0x2;
        const UNIFORM = 0x10;
        const STORAGE = 0x20;
        const INDEX = 0x40;
        const VERTEX = 0x80;
        const INDIRECT = 0x100;
    }
}

bitflags! {
    /// Ways a texture may be used. Bit values match `VkImageUsageFlags`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC = 0x1;
        const TRANSFER_DST = 0x2;
        const SAMPLED = 0x4;
        const STORAGE = 0x8;
        const RENDER_TARGET = 0x10;
        const DEPTH_STENCIL = 0x20;
    }
}

/// Where a buffer's memory lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryType {
    #[default]
    GpuOnly,
    CpuOnly,
    CpuToGpu,
    GpuToCpu,
}

impl MemoryType {
    /// Returns true when the CPU can map this memory.
    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryType::GpuOnly)
    }
}

/// Texture dimensionality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextureDimension {
    D1,
    #[default]
    D2,
    D3,
    Cube,
}

/// Texture filtering mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

/// Texture coordinate addressing outside `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

/// Value an attachment is cleared to when its load op is [`LoadOp::Clear`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    /// Opaque black.
    pub const DEFAULT_COLOR: ClearValue = ClearValue::Color([0.0, 0.0, 0.0, 1.0]);
    /// Far plane, zero stencil.
    pub const DEFAULT_DEPTH: ClearValue = ClearValue::DepthStencil {
        depth: 1.0,
        stencil: 0,
    };

    /// Returns the default clear value for attachments of `format`.
    pub fn default_for(format: Format) -> ClearValue {
        if format.is_depth() {
            Self::DEFAULT_DEPTH
        } else {
            Self::DEFAULT_COLOR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(Format::Depth32F.is_depth());
        assert!(!Format::Depth32F.has_stencil());
        assert!(Format::Depth24Stencil8.has_stencil());
        assert!(Format::Depth32FStencil8.is_depth());
        assert!(!Format::Bgra8Srgb.is_depth());
        assert!(Format::Bgra8Srgb.is_srgb());
    }

    #[test]
    fn test_extent_clamp() {
        let min = Extent2D::new(1, 1);
        let max = Extent2D::new(4096, 4096);
        assert_eq!(
            Extent2D::new(10_000, 0).clamp(min, max),
            Extent2D::new(4096, 1)
        );
        assert!(Extent2D::new(0, 720).is_zero());
        assert!(!Extent2D::new(1280, 720).is_zero());
    }

    #[test]
    fn test_shader_stage_flags() {
        assert_eq!(ShaderStage::Vertex.flag(), ShaderStages::VERTEX);
        assert_eq!(ShaderStage::Fragment.flag(), ShaderStages::FRAGMENT);
        assert!(ShaderStages::ALL_GRAPHICS.contains(ShaderStages::GEOMETRY));
        assert!(!ShaderStages::ALL_GRAPHICS.contains(ShaderStages::COMPUTE));
        assert_eq!(format!("{}", ShaderStage::TessControl), "tessellation control");
    }

    #[test]
    fn test_backend_default_matches_features() {
        let backend = Backend::default();
        assert!(backend.is_available());
        assert!(Backend::Headless.is_available());
    }

    #[test]
    fn test_backend_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            backend: Backend,
            format: Format,
        }
        let parsed: Wrapper =
            toml::from_str("backend = \"headless\"\nformat = \"depth24_stencil8\"").unwrap();
        assert_eq!(parsed.backend, Backend::Headless);
        assert_eq!(parsed.format, Format::Depth24Stencil8);
    }

    #[test]
    fn test_clear_value_defaults() {
        assert_eq!(
            ClearValue::default_for(Format::Depth32F),
            ClearValue::DEFAULT_DEPTH
        );
        assert_eq!(
            ClearValue::default_for(Format::Rgba8Unorm),
            ClearValue::Color([0.0, 0.0, 0.0, 1.0])
        );
    }
}
