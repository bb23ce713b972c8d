//! Copy a processed texture back to host memory

use std::sync::mpsc;

use wgpu::*;

use super::GpuContext;

/// Read every pixel of an RGBA8 texture created with `COPY_SRC`. Blocks until the copy lands.
pub fn read_rgba(gpu: &GpuContext, texture: &Texture) -> Result<Vec<u8>, BufferAsyncError> {
    let width = texture.width();
    let height = texture.height();
    let unpadded_bytes_per_row = width * 4;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT)
        * COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = gpu.device.create_buffer(&BufferDescriptor {
        label: Some("Readback Buffer"),
        size: padded_bytes_per_row as u64 * height as u64,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_texture_to_buffer(
        ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        ImageCopyBuffer {
            buffer: &buffer,
            layout: ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.submit_and_wait(encoder.finish());

    let slice = buffer.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    gpu.device.poll(Maintain::Wait);
    receiver.recv().map_err(|_| BufferAsyncError)??;

    let mapped = slice.get_mapped_range();
    let pixels = copy_tight_rows(
        &mapped,
        unpadded_bytes_per_row as usize,
        padded_bytes_per_row as usize,
        height as usize,
    );
    drop(mapped);
    buffer.unmap();

    Ok(pixels)
}

fn copy_tight_rows(mapped: &[u8], row_bytes: usize, padded_row_bytes: usize, rows: usize) -> Vec<u8> {
    let mut tight = Vec::with_capacity(row_bytes * rows);
    for row in mapped.chunks(padded_row_bytes).take(rows) {
        tight.extend_from_slice(&row[..row_bytes]);
    }
    tight
}
