//! Frame to texture ingestion with a small reusable texture cache

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};
use wgpu::*;

use crate::capture::decoder::{self, check_payload};
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::{FrameError, InitError};
use crate::layout::Size;

use super::GpuContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureKey {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Texture the GPU can sample from, valid until the next call into the cache that owns it
pub struct IngestedTexture {
    pub texture: Texture,
    pub view: TextureView,
    pub size: Size,
}

/// GPU texture format a frame can be uploaded as without CPU conversion
pub fn direct_format(format: PixelFormat) -> Option<TextureFormat> {
    match format {
        PixelFormat::Bgra8 => Some(TextureFormat::Bgra8Unorm),
        PixelFormat::Rgba8 => Some(TextureFormat::Rgba8Unorm),
        _ => None,
    }
}

/// Check that a 4-byte-per-pixel frame's rows fit its stride and its payload holds every row
pub fn check_direct_layout(meta: &FrameMetadata, data: &[u8]) -> Result<(), FrameError> {
    let row_bytes = u64::from(meta.width) * 4;
    if u64::from(meta.stride) < row_bytes {
        return Err(FrameError::TruncatedFrame {
            expected: usize::try_from(row_bytes).unwrap_or(usize::MAX),
            actual: meta.stride as usize,
        });
    }
    check_payload(data, meta.stride, meta.height)
}

/// Keyed pool of reusable entries. An entry is free when nothing outside the pool holds it.
pub(crate) struct Pool<T> {
    entries: Vec<PoolEntry<T>>,
    capacity: usize,
    max_age: u32,
}

struct PoolEntry<T> {
    key: TextureKey,
    age: u32,
    item: Arc<T>,
}

impl<T> Pool<T> {
    pub(crate) fn new(capacity: usize, max_age: u32) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            max_age,
        }
    }

    /// Take a free entry matching `key`, resetting its age
    pub(crate) fn checkout(&mut self, key: TextureKey) -> Option<Arc<T>> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.key == key && Arc::strong_count(&e.item) == 1)?;
        entry.age = 0;
        Some(entry.item.clone())
    }

    /// Track a new entry, evicting the oldest free one if the pool is full
    pub(crate) fn insert(&mut self, key: TextureKey, item: Arc<T>) {
        if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| Arc::strong_count(&e.item) == 1)
                .max_by_key(|(_, e)| e.age)
                .map(|(i, _)| i);
            if let Some(i) = oldest {
                self.entries.swap_remove(i);
            }
        }
        if self.entries.len() < self.capacity {
            self.entries.push(PoolEntry { key, age: 0, item });
        }
    }

    /// Age every entry and drop free ones older than the limit
    pub(crate) fn flush(&mut self) {
        let max_age = self.max_age;
        for entry in &mut self.entries {
            entry.age = entry.age.saturating_add(1);
        }
        self.entries
            .retain(|e| e.age <= max_age || Arc::strong_count(&e.item) > 1);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Wraps incoming frames as sampleable textures, reusing allocations between frames
pub struct TextureCache {
    gpu: Arc<GpuContext>,
    pool: Mutex<Pool<IngestedTexture>>,
}

impl TextureCache {
    pub fn new(gpu: Arc<GpuContext>, capacity: usize, max_age: u32) -> Result<Self, InitError> {
        if capacity == 0 {
            return Err(InitError::TextureCache);
        }
        Ok(Self {
            gpu,
            pool: Mutex::new(Pool::new(capacity, max_age)),
        })
    }

    /// Upload `frame` into a cached texture. Never blocks on the GPU; the frame is not
    /// retained past the call.
    pub fn ingest(&self, frame: &Frame) -> Result<Arc<IngestedTexture>, FrameError> {
        let meta = &frame.meta;
        if meta.width == 0 || meta.height == 0 {
            return Err(FrameError::ZeroArea {
                width: meta.width,
                height: meta.height,
            });
        }

        match direct_format(meta.format) {
            Some(format) => {
                check_direct_layout(meta, &frame.data)?;
                self.upload(
                    Size::new(meta.width, meta.height),
                    format,
                    &frame.data,
                    meta.stride,
                )
            }
            None => {
                let image = decoder::decode_to_rgba(frame)?;
                if image.width == 0 || image.height == 0 {
                    return Err(FrameError::ZeroArea {
                        width: image.width,
                        height: image.height,
                    });
                }
                self.upload(
                    Size::new(image.width, image.height),
                    TextureFormat::Rgba8Unorm,
                    &image.pixels,
                    image.width * 4,
                )
            }
        }
    }

    /// Age entries; call once per pipeline run
    pub fn flush(&self) {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush();
    }

    fn upload(
        &self,
        size: Size,
        format: TextureFormat,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<Arc<IngestedTexture>, FrameError> {
        let key = TextureKey {
            width: size.width,
            height: size.height,
            format,
        };

        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = match pool.checkout(key) {
            Some(entry) => {
                trace!(?key, "Reusing ingestion texture");
                entry
            }
            None => {
                debug!(?key, cached = pool.len(), "Allocating ingestion texture");
                let entry = Arc::new(self.create(key)?);
                pool.insert(key, entry.clone());
                entry
            }
        };
        drop(pool);

        self.gpu.queue.write_texture(
            ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            data,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(size.height),
            },
            Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );

        Ok(entry)
    }

    fn create(&self, key: TextureKey) -> Result<IngestedTexture, FrameError> {
        let texture = self.gpu.create_texture(&TextureDescriptor {
            label: Some("Ingested Frame"),
            size: Extent3d {
                width: key.width,
                height: key.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: key.format,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        })?;
        let view = texture.create_view(&TextureViewDescriptor::default());

        Ok(IngestedTexture {
            texture,
            view,
            size: Size::new(key.width, key.height),
        })
    }
}
