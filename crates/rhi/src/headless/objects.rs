//! Headless resources, pipelines and descriptor sets.
//!
//! These carry no GPU state. Buffers keep their bytes so uploads can be
//! read back; everything else only checks that the objects it references
//! belong to the headless backend too.

use std::sync::{Mutex, PoisonError};

use crate::descriptor::DescriptorWrite;
use crate::error::RhiResult;
use crate::pipeline::{ComputePipelineDesc, FramebufferDesc, GraphicsPipelineDesc, PipelineLayoutDesc};

pub(crate) struct HeadlessBuffer {
    data: Mutex<Vec<u8>>,
}

impl HeadlessBuffer {
    pub(crate) fn new(size: u64) -> Self {
        Self {
            data: Mutex::new(vec![0; size as usize]),
        }
    }

    /// Range checked by the caller.
    pub(crate) fn write(&self, offset: u64, bytes: &[u8]) {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let start = offset as usize;
        data[start..start + len].to_vec()
    }
}

/// A texture identified only by a device-unique id.
pub(crate) struct HeadlessTexture {
    id: u64,
}

impl HeadlessTexture {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

pub(crate) struct HeadlessSampler;

pub(crate) struct HeadlessShader;

impl HeadlessShader {
    pub(crate) fn new(words: usize) -> Self {
        tracing::trace!("headless: shader module of {} words", words);
        Self
    }
}

pub(crate) struct HeadlessRenderPass;

pub(crate) struct HeadlessFramebuffer;

impl HeadlessFramebuffer {
    pub(crate) fn new(desc: &FramebufferDesc<'_>) -> RhiResult<Self> {
        desc.render_pass.inner().as_headless()?;
        let ids = desc
            .attachments
            .iter()
            .map(|texture| texture.inner().as_headless().map(HeadlessTexture::id))
            .collect::<RhiResult<Vec<_>>>()?;
        tracing::trace!("headless: framebuffer over textures {:?}", ids);
        Ok(Self)
    }
}

pub(crate) struct HeadlessPipelineLayout;

impl HeadlessPipelineLayout {
    pub(crate) fn new(desc: &PipelineLayoutDesc<'_>) -> RhiResult<Self> {
        for layout in &desc.set_layouts {
            layout.inner().as_headless()?;
        }
        Ok(Self)
    }
}

pub(crate) struct HeadlessPipeline;

impl HeadlessPipeline {
    pub(crate) fn graphics(desc: &GraphicsPipelineDesc<'_>) -> RhiResult<Self> {
        desc.vertex_shader.inner().as_headless()?;
        if let Some(fragment) = desc.fragment_shader {
            fragment.inner().as_headless()?;
        }
        desc.layout.inner().as_headless()?;
        desc.render_pass.inner().as_headless()?;
        Ok(Self)
    }

    pub(crate) fn compute(desc: &ComputePipelineDesc<'_>) -> RhiResult<Self> {
        desc.shader.inner().as_headless()?;
        desc.layout.inner().as_headless()?;
        Ok(Self)
    }
}

pub(crate) struct HeadlessDescriptorSetLayout;

#[derive(Default)]
pub(crate) struct HeadlessDescriptorSet {
    updates: u64,
}

impl HeadlessDescriptorSet {
    /// Writes are validated against the layout by the caller.
    pub(crate) fn update(&mut self, writes: &[DescriptorWrite<'_>]) {
        self.updates += writes.len() as u64;
    }

    #[cfg(test)]
    pub(crate) fn update_count(&self) -> u64 {
        self.updates
    }
}
