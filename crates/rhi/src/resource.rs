//! GPU resources: buffers, textures, samplers and shader modules.
//!
//! Descriptions are plain values validated by [`Device`] before a backend
//! sees them. Every resource keeps its description, so queries such as
//! [`Buffer::size`] or [`Texture::format`] never touch the backend.
//!
//! # Example
//!
//! ```
//! use mango_rhi::{BufferDesc, BufferUsage, Device, DeviceDesc, MemoryType};
//!
//! # fn main() -> Result<(), mango_rhi::RhiError> {
//! let device = Device::new(&DeviceDesc::headless(), None)?;
//! let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
//! let buffer = device.create_buffer(&BufferDesc::new(
//!     24,
//!     BufferUsage::VERTEX,
//!     MemoryType::CpuToGpu,
//! ))?;
//! buffer.write(0, bytemuck::cast_slice(&vertices))?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::headless::{HeadlessBuffer, HeadlessSampler, HeadlessShader, HeadlessTexture};
use crate::types::{
    AddressMode, Backend, BufferUsage, Extent2D, Filter, Format, MemoryType, ShaderStage,
    TextureDimension, TextureUsage,
};

#[cfg(feature = "vulkan")]
use crate::vulkan::resource::{VulkanBuffer, VulkanSampler, VulkanShader, VulkanTexture};

backend_inner!(BufferInner {
    vulkan: VulkanBuffer,
    headless: HeadlessBuffer,
});

backend_inner!(TextureInner {
    vulkan: VulkanTexture,
    headless: HeadlessTexture,
});

backend_inner!(SamplerInner {
    vulkan: VulkanSampler,
    headless: HeadlessSampler,
});

backend_inner!(ShaderInner {
    vulkan: VulkanShader,
    headless: HeadlessShader,
});

/// Little-endian SPIR-V magic number.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

// =========================================================================
// Buffer
// =========================================================================

/// Buffer creation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryType,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage, memory: MemoryType) -> Self {
        Self {
            size,
            usage,
            memory,
        }
    }

    pub(crate) fn validate(&self) -> RhiResult<()> {
        if self.size == 0 {
            return Err(RhiError::InvalidDescription(
                "buffer size must be greater than 0".to_string(),
            ));
        }
        if self.usage.is_empty() {
            return Err(RhiError::InvalidDescription(
                "buffer usage must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A linear block of GPU memory.
pub struct Buffer {
    inner: BufferInner,
    desc: BufferDesc,
}

impl Buffer {
    pub(crate) fn from_inner(inner: BufferInner, desc: BufferDesc) -> Self {
        debug!(
            "Created buffer: {} bytes, {:?}, {:?}",
            desc.size, desc.usage, desc.memory
        );
        Self { inner, desc }
    }

    pub(crate) fn inner(&self) -> &BufferInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    #[inline]
    pub fn memory(&self) -> MemoryType {
        self.desc.memory
    }

    fn check_host_range(&self, operation: &'static str, offset: u64, len: usize) -> RhiResult<()> {
        if !self.desc.memory.is_host_visible() {
            return Err(RhiError::protocol_violation(
                operation,
                format!("buffer memory {:?} is not host visible", self.desc.memory),
            ));
        }
        let end = offset.checked_add(len as u64);
        if end.is_none_or(|end| end > self.desc.size) {
            return Err(RhiError::protocol_violation(
                operation,
                format!(
                    "range exceeds buffer size: offset {} + data {} > buffer {}",
                    offset, len, self.desc.size
                ),
            ));
        }
        Ok(())
    }

    /// Copies `data` into host-visible memory at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_host_range("Buffer::write", offset, data.len())?;
        match &self.inner {
            #[cfg(feature = "vulkan")]
            BufferInner::Vulkan(buffer) => buffer.write(offset, data),
            BufferInner::Headless(buffer) => {
                buffer.write(offset, data);
                Ok(())
            }
        }
    }

    /// Writes a slice of plain-old-data values.
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: u64, values: &[T]) -> RhiResult<()> {
        self.write(offset, bytemuck::cast_slice(values))
    }

    /// Reads `len` bytes of host-visible memory at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> RhiResult<Vec<u8>> {
        self.check_host_range("Buffer::read", offset, len)?;
        match &self.inner {
            #[cfg(feature = "vulkan")]
            BufferInner::Vulkan(buffer) => buffer.read(offset, len),
            BufferInner::Headless(buffer) => Ok(buffer.read(offset, len)),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("backend", &self.backend())
            .field("desc", &self.desc)
            .finish()
    }
}

// =========================================================================
// Texture
// =========================================================================

/// Texture creation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub fn new_2d(format: Format, width: u32, height: u32, usage: TextureUsage) -> Self {
        Self {
            dimension: TextureDimension::D2,
            format,
            width,
            height,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            usage,
        }
    }

    /// A depth(-stencil) attachment of the given size.
    pub fn depth_attachment(format: Format, extent: Extent2D) -> Self {
        Self::new_2d(
            format,
            extent.width,
            extent.height,
            TextureUsage::DEPTH_STENCIL,
        )
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// Length of the full mip chain for this size.
    pub fn max_mip_levels(&self) -> u32 {
        let largest = self.width.max(self.height).max(self.depth).max(1);
        32 - largest.leading_zeros()
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }

    pub(crate) fn validate(&self) -> RhiResult<()> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(RhiError::InvalidDescription(format!(
                "texture extent {}x{}x{} has a zero dimension",
                self.width, self.height, self.depth
            )));
        }
        if self.mip_levels == 0 || self.mip_levels > self.max_mip_levels() {
            return Err(RhiError::InvalidDescription(format!(
                "mip level count {} outside 1..={}",
                self.mip_levels,
                self.max_mip_levels()
            )));
        }
        if self.array_layers == 0 {
            return Err(RhiError::InvalidDescription(
                "texture needs at least one array layer".to_string(),
            ));
        }
        if self.dimension == TextureDimension::Cube && self.array_layers % 6 != 0 {
            return Err(RhiError::InvalidDescription(format!(
                "cube textures need a multiple of 6 layers, got {}",
                self.array_layers
            )));
        }
        if self.usage.contains(TextureUsage::DEPTH_STENCIL) != self.format.is_depth() {
            return Err(RhiError::InvalidDescription(format!(
                "depth-stencil usage and depth format {:?} must go together",
                self.format
            )));
        }
        if self.usage.is_empty() {
            return Err(RhiError::InvalidDescription(
                "texture usage must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A sampled image, render target or depth buffer.
pub struct Texture {
    inner: TextureInner,
    desc: TextureDesc,
}

impl Texture {
    pub(crate) fn from_inner(inner: TextureInner, desc: TextureDesc) -> Self {
        debug!(
            "Created texture: {}x{} {:?}, {} mip(s), {:?}",
            desc.width, desc.height, desc.format, desc.mip_levels, desc.usage
        );
        Self { inner, desc }
    }

    pub(crate) fn inner(&self) -> &TextureInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.desc.extent()
    }

    #[inline]
    pub fn usage(&self) -> TextureUsage {
        self.desc.usage
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("backend", &self.backend())
            .field("desc", &self.desc)
            .finish()
    }
}

// =========================================================================
// Sampler
// =========================================================================

/// Sampler creation parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerDesc {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
}

/// Texture sampling state.
pub struct Sampler {
    inner: SamplerInner,
    desc: SamplerDesc,
}

impl Sampler {
    pub(crate) fn from_inner(inner: SamplerInner, desc: SamplerDesc) -> Self {
        debug!("Created sampler: {:?}", desc);
        Self { inner, desc }
    }

    pub(crate) fn inner(&self) -> &SamplerInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

// =========================================================================
// Shader
// =========================================================================

/// Shader module creation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderDesc {
    pub stage: ShaderStage,
    pub entry_point: String,
    /// SPIR-V words.
    pub code: Vec<u32>,
}

impl ShaderDesc {
    /// Builds a description from raw SPIR-V bytes, checking alignment and
    /// the magic number.
    pub fn from_spirv_bytes(stage: ShaderStage, entry_point: &str, bytes: &[u8]) -> RhiResult<Self> {
        if bytes.len() % 4 != 0 {
            return Err(RhiError::Shader(format!(
                "SPIR-V code must be 4-byte aligned, got {} bytes",
                bytes.len()
            )));
        }

        let code: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let desc = Self {
            stage,
            entry_point: entry_point.to_string(),
            code,
        };
        desc.validate()?;
        Ok(desc)
    }

    pub(crate) fn validate(&self) -> RhiResult<()> {
        match self.code.first() {
            Some(&SPIRV_MAGIC) => {}
            Some(&word) => {
                return Err(RhiError::Shader(format!(
                    "invalid SPIR-V magic number {:#010x}",
                    word
                )));
            }
            None => return Err(RhiError::Shader("SPIR-V code is empty".to_string())),
        }
        if self.entry_point.is_empty() || self.entry_point.contains('\0') {
            return Err(RhiError::Shader(format!(
                "invalid entry point name {:?}",
                self.entry_point
            )));
        }
        Ok(())
    }
}

/// A compiled shader module of one stage.
pub struct Shader {
    inner: ShaderInner,
    stage: ShaderStage,
    entry_point: String,
}

impl Shader {
    pub(crate) fn from_inner(inner: ShaderInner, desc: &ShaderDesc) -> Self {
        debug!(
            "Created {} shader module with entry point '{}'",
            desc.stage, desc.entry_point
        );
        Self {
            inner,
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
        }
    }

    /// Loads a shader from a SPIR-V file.
    pub fn from_spirv_file(
        device: &Device,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);
        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::Shader(format!("Failed to read shader file {:?}: {}", path, e))
        })?;
        Self::from_spirv_bytes(device, &bytes, stage, entry_point)
    }

    /// Creates a shader from SPIR-V bytes.
    pub fn from_spirv_bytes(
        device: &Device,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        device.create_shader(&ShaderDesc::from_spirv_bytes(stage, entry_point, bytes)?)
    }

    pub(crate) fn inner(&self) -> &ShaderInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}
