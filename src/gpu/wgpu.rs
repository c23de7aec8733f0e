// SPDX-License-Identifier: GPL-3.0-or-later

//! wgpu compute backend. Owns the device, the dewarp pipeline and the
//! size-dependent resources; the adapter is cached process-wide so multiple
//! instances don't enumerate the hardware repeatedly.

use parking_lot::RwLock;
use rayon::prelude::*;

use super::{padded_bytes_per_row, ReadbackRing};
use crate::dewarping::KernelParams;
use crate::error::FisheyeError;
use crate::frame::VideoFrame;

lazy_static::lazy_static! {
    static ref ADAPTER: RwLock<Option<wgpu::Adapter>> = RwLock::new(None);
}

fn ensure_adapter() -> Result<(), FisheyeError> {
    let mut lock = ADAPTER.write();
    if lock.is_none() {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(FisheyeError::NoAdapter)?;
        log::debug!("wgpu adapter: {:?}", adapter.get_info());
        *lock = Some(adapter);
    }
    Ok(())
}

enum InputState {
    Empty,
    Allocated {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        size: (u32, u32),
    },
}

enum OutputState {
    Empty,
    Allocated {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        readback: [wgpu::Buffer; 2],
        size: (u32, u32),
        padded_stride: u32,
    },
}

pub struct WgpuDewarper {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    params_buffer: wgpu::Buffer,
    input: InputState,
    output: OutputState,
    bind_group: Option<wgpu::BindGroup>,
    ring: ReadbackRing,
}

impl WgpuDewarper {
    pub fn new() -> Result<Self, FisheyeError> {
        ensure_adapter()?;
        let lock = ADAPTER.read();
        let adapter = lock.as_ref().ok_or(FisheyeError::NoAdapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("fisheye device"),
                features: wgpu::Features::empty(),
                limits: adapter.limits(),
            },
            None,
        ))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("dewarp.wgsl"),
            source: wgpu::ShaderSource::Wgsl(include_str!("dewarp.wgsl").into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("dewarp pipeline"),
            layout: None,
            module: &shader,
            entry_point: "dewarp",
        });
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            params_buffer,
            input: InputState::Empty,
            output: OutputState::Empty,
            bind_group: None,
            ring: ReadbackRing::default(),
        })
    }

    fn prepare_input(&mut self, size: (u32, u32)) {
        if let InputState::Allocated { size: current, .. } = &self.input {
            if *current == size {
                return;
            }
        }
        log::debug!("allocating {}x{} input texture", size.0, size.1);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fisheye input"),
            size: wgpu::Extent3d { width: size.0, height: size.1, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.input = InputState::Allocated { texture, view, size };
        self.bind_group = None;
    }

    fn prepare_output(&mut self, size: (u32, u32)) {
        if let OutputState::Allocated { size: current, .. } = &self.output {
            if *current == size {
                return;
            }
        }
        log::debug!("allocating {}x{} output chain", size.0, size.1);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fisheye output"),
            size: wgpu::Extent3d { width: size.0, height: size.1, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let padded_stride = padded_bytes_per_row(size.0);
        let readback_size = padded_stride as u64 * size.1 as u64;
        let readback = [0, 1].map(|i| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(if i == 0 { "readback 0" } else { "readback 1" }),
                size: readback_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        self.output = OutputState::Allocated { texture, view, readback, size, padded_stride };
        self.bind_group = None;
        self.ring.reset();
    }

    /// Drops the output texture and readback buffers; they are reallocated
    /// lazily on the next frame.
    pub fn release_output(&mut self) {
        self.output = OutputState::Empty;
        self.bind_group = None;
        self.ring.reset();
    }

    /// Uploads the frame, dispatches the dewarp pass and reads back the
    /// result. In steady state the returned pixels are the previous frame's
    /// (two-slot readback ring); the caller's timestamp is carried through.
    pub fn process(&mut self, params: &KernelParams, frame: &VideoFrame) -> Result<VideoFrame, FisheyeError> {
        let expected = VideoFrame::byte_len(frame.width, frame.height);
        if frame.data.len() != expected {
            log::error!("frame buffer is {} bytes, expected {}", frame.data.len(), expected);
            return Err(FisheyeError::BufferSize { expected, got: frame.data.len() });
        }

        self.prepare_input((frame.width, frame.height));
        self.prepare_output((params.output_width, params.output_height));

        let InputState::Allocated { texture: input_texture, view: input_view, .. } = &self.input else {
            return Err(FisheyeError::Internal("input texture not allocated".into()));
        };
        let OutputState::Allocated { texture: output_texture, view: output_view, readback, size, padded_stride } =
            &self.output
        else {
            return Err(FisheyeError::Internal("output chain not allocated".into()));
        };
        let (out_w, out_h) = *size;
        let padded_stride = *padded_stride;

        self.queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
        self.queue.write_texture(
            input_texture.as_image_copy(),
            &frame.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d { width: frame.width, height: frame.height, depth_or_array_layers: 1 },
        );

        if self.bind_group.is_none() {
            let layout = self.pipeline.get_bind_group_layout(0);
            self.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("dewarp bind group"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(input_view) },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(output_view) },
                    wgpu::BindGroupEntry { binding: 2, resource: self.params_buffer.as_entire_binding() },
                ],
            }));
        }
        let bind_group = self
            .bind_group
            .as_ref()
            .ok_or_else(|| FisheyeError::Internal("bind group not built".into()))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("dewarp encoder") });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("dewarp pass") });
            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, bind_group, &[]);
            cpass.dispatch_workgroups((out_w + 15) / 16, (out_h + 15) / 16, 1);
        }

        let write_slot = self.ring.write_slot();
        encoder.copy_texture_to_buffer(
            output_texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &readback[write_slot],
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_stride),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d { width: out_w, height: out_h, depth_or_array_layers: 1 },
        );
        self.queue.submit(Some(encoder.finish()));

        let read_slot = self.ring.commit();
        let buffer = &readback[read_slot];
        let slice = buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        match pollster::block_on(receiver.receive()) {
            Some(result) => result?,
            None => return Err(FisheyeError::Internal("readback channel closed".into())),
        }

        let tight_stride = out_w as usize * 4;
        let len = VideoFrame::byte_len(out_w, out_h);
        let mut pixels = vec![0u8; len];
        {
            let mapped = slice.get_mapped_range();
            if padded_stride as usize == tight_stride {
                pixels.copy_from_slice(&mapped[..len]);
            } else {
                pixels
                    .par_chunks_mut(tight_stride)
                    .zip(mapped.par_chunks(padded_stride as usize))
                    .for_each(|(row, padded)| row.copy_from_slice(&padded[..tight_stride]));
            }
        }
        buffer.unmap();

        Ok(VideoFrame {
            data: pixels,
            width: out_w,
            height: out_h,
            timestamp_us: frame.timestamp_us,
        })
    }
}
